// =============================================================================
// Upstream history sources
// =============================================================================

pub mod enriched;
pub mod kline;

use async_trait::async_trait;

use crate::datafeed::SymbolContext;
use crate::error::FeedError;
use crate::market_data::{EnrichedRow, KlineRow};
use crate::resolution::Resolution;
use crate::types::FeedVariant;

pub use enriched::EnrichedClient;
pub use kline::KlineClient;

/// Parameters of one historical page request.
#[derive(Debug, Clone)]
pub struct PageRequest<'a> {
    pub symbol: &'a SymbolContext,
    pub resolution: Resolution,
    /// Requested range in unix seconds, `[from, to)`.
    pub from: i64,
    pub to: i64,
    /// `None` on the first page of a session.
    pub cursor: Option<&'a str>,
    pub limit: u32,
}

/// Raw rows of one page, tagged by the feed that produced them.
#[derive(Debug, Clone)]
pub enum RawSamples {
    Kline(Vec<KlineRow>),
    Enriched(Vec<EnrichedRow>),
}

impl RawSamples {
    pub fn row_count(&self) -> usize {
        match self {
            Self::Kline(rows) => rows.len(),
            Self::Enriched(rows) => rows.len(),
        }
    }
}

/// One page of raw history plus the cursor for the page after it.
#[derive(Debug, Clone)]
pub struct Page {
    pub samples: RawSamples,
    pub next_cursor: Option<String>,
}

/// A read-only source of historical rows.
#[async_trait]
pub trait HistorySource: Send + Sync {
    fn variant(&self) -> FeedVariant;

    /// Fetch one page. Transport and parse failures surface as
    /// [`FeedError::UpstreamUnavailable`].
    async fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Page, FeedError>;

    /// Cheap "does this pool have at least one row yet" probe. Failures count
    /// as "no".
    async fn has_data(&self, _pool_id: &str) -> bool {
        true
    }
}

/// Some upstream gateways wrap payloads in `{ "data": { ... } }`; accept both.
pub(crate) fn unwrap_envelope(body: serde_json::Value) -> serde_json::Value {
    match body {
        serde_json::Value::Object(mut map) if map.get("data").is_some_and(|d| d.is_object()) => {
            map.remove("data").unwrap_or_default()
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_is_unwrapped_only_when_data_is_an_object() {
        let wrapped = serde_json::json!({ "data": { "rows": [] } });
        assert_eq!(unwrap_envelope(wrapped), serde_json::json!({ "rows": [] }));

        let bare = serde_json::json!({ "rows": [], "data": 3 });
        assert_eq!(unwrap_envelope(bare.clone()), bare);
    }
}
