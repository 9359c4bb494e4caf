// =============================================================================
// Resolution Table — chart resolution labels and their bucket widths
// =============================================================================

use serde::Serialize;

use crate::error::FeedError;

/// Resolutions the datafeed advertises to chart widgets. The table below knows
/// more; these are the ones the kline history service serves natively.
pub const DATAFEED_RESOLUTIONS: &[&str] = &["1", "5", "15"];

/// A supported chart resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resolution {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
    W1,
    Mo1,
}

/// One row of the resolution table, as exposed over the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionSpec {
    pub label: &'static str,
    pub bucket_seconds: i64,
}

impl Resolution {
    pub const ALL: [Resolution; 8] = [
        Self::M1,
        Self::M5,
        Self::M15,
        Self::H1,
        Self::H4,
        Self::D1,
        Self::W1,
        Self::Mo1,
    ];

    /// Parse a chart resolution label (`"1"`, `"5"`, ..., `"1D"`, `"1W"`, `"1M"`).
    pub fn from_label(label: &str) -> Result<Self, FeedError> {
        match label {
            "1" => Ok(Self::M1),
            "5" => Ok(Self::M5),
            "15" => Ok(Self::M15),
            "60" => Ok(Self::H1),
            "240" => Ok(Self::H4),
            "1D" => Ok(Self::D1),
            "1W" => Ok(Self::W1),
            "1M" => Ok(Self::Mo1),
            other => Err(FeedError::UnknownResolution(other.to_string())),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::M1 => "1",
            Self::M5 => "5",
            Self::M15 => "15",
            Self::H1 => "60",
            Self::H4 => "240",
            Self::D1 => "1D",
            Self::W1 => "1W",
            Self::Mo1 => "1M",
        }
    }

    /// Bucket width in seconds. A month is a flat 30 days.
    pub fn bucket_seconds(self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::M5 => 5 * 60,
            Self::M15 => 15 * 60,
            Self::H1 => 60 * 60,
            Self::H4 => 60 * 60 * 4,
            Self::D1 => 60 * 60 * 24,
            Self::W1 => 60 * 60 * 24 * 7,
            Self::Mo1 => 60 * 60 * 24 * 30,
        }
    }

    /// Interval label understood by the kline history service. Anything the
    /// datafeed does not advertise falls back to five-minute rows.
    pub fn kline_interval(self) -> String {
        if DATAFEED_RESOLUTIONS.contains(&self.label()) {
            format!("{}m", self.label())
        } else {
            "5m".to_string()
        }
    }

    /// Frame label understood by the enriched OHLCV feed. Daily and longer
    /// frames pass through, intraday frames up to 15 minutes get an `m`
    /// suffix, and hourly frames are built from 15-minute rows.
    pub fn enriched_frame(self) -> String {
        if self.bucket_seconds() >= Self::D1.bucket_seconds() {
            self.label().to_string()
        } else if self.bucket_seconds() <= Self::M15.bucket_seconds() {
            format!("{}m", self.label())
        } else {
            "15m".to_string()
        }
    }

    pub fn spec(self) -> ResolutionSpec {
        ResolutionSpec {
            label: self.label(),
            bucket_seconds: self.bucket_seconds(),
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Lookup by label straight to the bucket width.
pub fn bucket_seconds_of(label: &str) -> Result<i64, FeedError> {
    Resolution::from_label(label).map(Resolution::bucket_seconds)
}

/// Start of the bucket containing `timestamp` (both in seconds).
pub fn bucket_start(timestamp: i64, width_secs: i64) -> i64 {
    timestamp.div_euclid(width_secs) * width_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_expected_widths() {
        let expected = [
            ("1", 60),
            ("5", 300),
            ("15", 900),
            ("60", 3600),
            ("240", 14_400),
            ("1D", 86_400),
            ("1W", 604_800),
            ("1M", 2_592_000),
        ];
        for (label, secs) in expected {
            assert_eq!(bucket_seconds_of(label).unwrap(), secs, "label {label}");
        }
    }

    #[test]
    fn unknown_label_is_rejected() {
        assert_eq!(
            bucket_seconds_of("3"),
            Err(FeedError::UnknownResolution("3".into()))
        );
        assert!(Resolution::from_label("1d").is_err());
    }

    #[test]
    fn labels_round_trip() {
        for res in Resolution::ALL {
            assert_eq!(Resolution::from_label(res.label()).unwrap(), res);
        }
    }

    #[test]
    fn kline_interval_falls_back_to_five_minutes() {
        assert_eq!(Resolution::M1.kline_interval(), "1m");
        assert_eq!(Resolution::M15.kline_interval(), "15m");
        assert_eq!(Resolution::H1.kline_interval(), "5m");
        assert_eq!(Resolution::D1.kline_interval(), "5m");
    }

    #[test]
    fn enriched_frame_mapping() {
        assert_eq!(Resolution::M5.enriched_frame(), "5m");
        assert_eq!(Resolution::H4.enriched_frame(), "15m");
        assert_eq!(Resolution::D1.enriched_frame(), "1D");
        assert_eq!(Resolution::Mo1.enriched_frame(), "1M");
    }

    #[test]
    fn bucket_start_floors() {
        assert_eq!(bucket_start(1000, 60), 960);
        assert_eq!(bucket_start(960, 60), 960);
        assert_eq!(bucket_start(-1, 60), -60);
    }
}
