// =============================================================================
// Runtime Configuration — service settings with atomic save
// =============================================================================
//
// Everything the chart feed service can be tuned with: upstream hosts, the
// live transport URL, paging and readiness budgets, the autosave period and
// the API bind address.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older config file.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::datafeed::{DatafeedSettings, INIT_POOL_PRICE};
use crate::readiness::ReadinessGate;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_history_host() -> String {
    "https://launch-history-v1.raydium.io".to_string()
}

fn default_enriched_host() -> String {
    "https://birdeye-proxy.raydium.io".to_string()
}

fn default_live_url() -> String {
    "wss://launch-history-v1.raydium.io/ws?poolId={pool_id}".to_string()
}

fn default_page_limit() -> u32 {
    300
}

fn default_readiness_interval_ms() -> u64 {
    1000
}

fn default_readiness_attempts() -> u32 {
    15
}

fn default_init_price_floor() -> f64 {
    INIT_POOL_PRICE
}

fn default_autosave_interval_ms() -> u64 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_chart_config_path() -> String {
    "chart_preferences.json".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration of the chart feed service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Upstreams -----------------------------------------------------------

    /// Kline history service base URL.
    #[serde(default = "default_history_host")]
    pub history_host: String,

    /// Enriched OHLCV feed base URL.
    #[serde(default = "default_enriched_host")]
    pub enriched_host: String,

    /// Live bar stream URL; `{pool_id}` is replaced per connection.
    #[serde(default = "default_live_url")]
    pub live_url: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    // --- Datafeed ------------------------------------------------------------

    /// Rows per kline history page.
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    #[serde(default = "default_readiness_interval_ms")]
    pub readiness_interval_ms: u64,

    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,

    /// Caps `open`/`low` of a single-bar kline page (a pool's first print).
    #[serde(default = "default_init_price_floor")]
    pub init_price_floor: f64,

    #[serde(default = "default_autosave_interval_ms")]
    pub autosave_interval_ms: u64,

    // --- Service -------------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Where per-chart preferences are persisted.
    #[serde(default = "default_chart_config_path")]
    pub chart_config_path: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            history_host: default_history_host(),
            enriched_host: default_enriched_host(),
            live_url: default_live_url(),
            request_timeout_ms: default_request_timeout_ms(),
            page_limit: default_page_limit(),
            readiness_interval_ms: default_readiness_interval_ms(),
            readiness_attempts: default_readiness_attempts(),
            init_price_floor: default_init_price_floor(),
            autosave_interval_ms: default_autosave_interval_ms(),
            bind_addr: default_bind_addr(),
            chart_config_path: default_chart_config_path(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            history_host = %config.history_host,
            enriched_host = %config.enriched_host,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Apply `CHART_FEED_*` overrides from `lookup` (the process environment
    /// in `main`). Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(host) = var("CHART_FEED_HISTORY_HOST") {
            self.history_host = host;
        }
        if let Some(host) = var("CHART_FEED_ENRICHED_HOST") {
            self.enriched_host = host;
        }
        if let Some(url) = var("CHART_FEED_LIVE_URL") {
            self.live_url = url;
        }
        if let Some(addr) = var("CHART_FEED_BIND_ADDR") {
            self.bind_addr = addr;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Per-chart datafeed tunables.
    pub fn datafeed_settings(&self) -> DatafeedSettings {
        DatafeedSettings {
            page_limit: self.page_limit,
            init_price_floor: self.init_price_floor,
            readiness: ReadinessGate::new(
                Duration::from_millis(self.readiness_interval_ms),
                self.readiness_attempts,
            ),
            autosave_interval: Duration::from_millis(self.autosave_interval_ms),
        }
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}
