// =============================================================================
// Shared types used across the chart feed
// =============================================================================

use serde::{Deserialize, Serialize};

/// One OHLCV record for a fixed time bucket.
///
/// `time` is the bucket start as a millisecond epoch and is always an exact
/// multiple of the bucket width in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl Bar {
    /// `low <= min(open, close) <= max(open, close) <= high`.
    pub fn is_well_formed(&self) -> bool {
        self.low <= self.open.min(self.close) && self.open.max(self.close) <= self.high
    }
}

/// Which upstream a chart draws its history from.
///
/// `Kline` is the internal launchpad history service (paginated, live tail
/// available). `Enriched` is the external enriched OHLCV feed (time-ranged,
/// optional market-cap scaling, no live tail).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedVariant {
    Kline,
    Enriched,
}

impl Default for FeedVariant {
    fn default() -> Self {
        Self::Kline
    }
}

impl std::fmt::Display for FeedVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kline => write!(f, "kline"),
            Self::Enriched => write!(f, "enriched"),
        }
    }
}

/// Colour theme persisted alongside the chart resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Default for Theme {
    fn default() -> Self {
        Self::Dark
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_without_volume_omits_field() {
        let bar = Bar {
            time: 60_000,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: None,
        };
        let json = serde_json::to_string(&bar).unwrap();
        assert!(!json.contains("volume"));
        assert!(bar.is_well_formed());
    }

    #[test]
    fn inverted_bar_is_not_well_formed() {
        let bar = Bar {
            time: 0,
            open: 3.0,
            high: 2.0,
            low: 1.0,
            close: 1.5,
            volume: Some(1.0),
        };
        assert!(!bar.is_well_formed());
    }

    #[test]
    fn variant_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&FeedVariant::Enriched).unwrap(), "\"enriched\"");
        assert_eq!(FeedVariant::Kline.to_string(), "kline");
    }
}
