use thiserror::Error;

/// All caller-visible failures of the chart feed.
///
/// "No data yet" is deliberately absent: an empty history page or an
/// exhausted readiness budget is a success-shaped outcome, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("unknown resolution: {0}")]
    UnknownResolution(String),

    #[error("cannot resolve symbol: {0}")]
    CannotResolveSymbol(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("history response for {symbol} arrived after the session moved on")]
    Superseded { symbol: String },

    #[error("datafeed has been disposed")]
    Disposed,
}

impl FeedError {
    /// Stable machine-readable code sent to chart clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownResolution(_) => "unknown_resolution",
            Self::CannotResolveSymbol(_) => "cannot_resolve_symbol",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::Superseded { .. } => "superseded",
            Self::Disposed => "disposed",
        }
    }
}

impl From<anyhow::Error> for FeedError {
    fn from(e: anyhow::Error) -> Self {
        Self::UpstreamUnavailable(format!("{e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyhow_errors_become_upstream_unavailable() {
        let err: FeedError = anyhow::anyhow!("connection refused").into();
        assert_eq!(err.code(), "upstream_unavailable");
        assert!(err.to_string().contains("connection refused"));
    }
}
