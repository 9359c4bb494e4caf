// =============================================================================
// Central Application State — chart feed service
// =============================================================================
//
// Shared by every API handler through `Arc<AppState>`: the runtime config, the
// two history clients, the live transport, the chart preference store and the
// service counters reported by `/api/v1/status`.
//
// Thread safety:
//   - Atomic counters for session bookkeeping.
//   - parking_lot::RwLock for the config and the error log.
//   - Clients and the transport are shared behind `Arc`.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::chart_config::ChartConfigStore;
use crate::datafeed::{ChartProps, Datafeed};
use crate::live::{LiveTransport, WsTransport};
use crate::runtime_config::RuntimeConfig;
use crate::types::FeedVariant;
use crate::upstream::{EnrichedClient, HistorySource, KlineClient};

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Machine-readable `FeedError` code.
    pub code: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub server_time: i64,
    pub uptime_secs: u64,
    pub active_sessions: u64,
    pub total_sessions: u64,
    pub history_host: String,
    pub enriched_host: String,
    pub recent_errors: Vec<ErrorRecord>,
}

// =============================================================================
// AppState
// =============================================================================

pub struct AppState {
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Upstreams ───────────────────────────────────────────────────────
    pub kline_client: Arc<KlineClient>,
    pub enriched_client: Arc<EnrichedClient>,
    pub transport: Arc<dyn LiveTransport>,

    // ── Chart preferences ───────────────────────────────────────────────
    pub chart_config: Arc<ChartConfigStore>,

    // ── Session bookkeeping ─────────────────────────────────────────────
    pub active_sessions: AtomicU64,
    pub total_sessions: AtomicU64,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    /// Instant when the service was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct the shared state from `config`, wiring the real HTTP clients
    /// and the WebSocket live transport.
    pub fn new(config: RuntimeConfig) -> Self {
        let timeout = config.request_timeout();
        let kline_client = Arc::new(KlineClient::new(config.history_host.clone(), timeout));
        let enriched_client = Arc::new(EnrichedClient::new(config.enriched_host.clone(), timeout));
        let transport: Arc<dyn LiveTransport> = Arc::new(WsTransport::new(config.live_url.clone()));
        let chart_config = Arc::new(ChartConfigStore::load(&config.chart_config_path));

        Self {
            runtime_config: Arc::new(RwLock::new(config)),
            kline_client,
            enriched_client,
            transport,
            chart_config,
            active_sessions: AtomicU64::new(0),
            total_sessions: AtomicU64::new(0),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    /// History source backing a chart of `variant`.
    pub fn history_source(&self, variant: FeedVariant) -> Arc<dyn HistorySource> {
        match variant {
            FeedVariant::Kline => self.kline_client.clone(),
            FeedVariant::Enriched => self.enriched_client.clone(),
        }
    }

    /// A fresh datafeed for one chart instance.
    pub fn open_datafeed(&self, variant: FeedVariant, props: ChartProps) -> Datafeed {
        let settings = self.runtime_config.read().datafeed_settings();
        Datafeed::new(settings, props, self.history_source(variant), self.transport.clone())
    }

    // ── Session counters ────────────────────────────────────────────────

    pub fn session_opened(&self) {
        self.active_sessions.fetch_add(1, Ordering::SeqCst);
        self.total_sessions.fetch_add(1, Ordering::SeqCst);
    }

    pub fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::SeqCst);
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error with an optional machine-readable code. The ring
    /// buffer is capped at [`MAX_RECENT_ERRORS`].
    pub fn push_error_with_code(&self, msg: String, code: Option<String>) {
        let record = ErrorRecord {
            message: msg,
            code,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    pub fn build_status(&self) -> StatusSnapshot {
        let config = self.runtime_config.read();
        StatusSnapshot {
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            active_sessions: self.active_sessions.load(Ordering::SeqCst),
            total_sessions: self.total_sessions.load(Ordering::SeqCst),
            history_host: config.history_host.clone(),
            enriched_host: config.enriched_host.clone(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        let config = RuntimeConfig {
            chart_config_path: std::env::temp_dir()
                .join(format!("chart-prefs-{}.json", uuid::Uuid::new_v4()))
                .display()
                .to_string(),
            ..RuntimeConfig::default()
        };
        AppState::new(config)
    }

    #[test]
    fn session_counters_track_open_and_close() {
        let state = state();
        state.session_opened();
        state.session_opened();
        state.session_closed();

        let status = state.build_status();
        assert_eq!(status.active_sessions, 1);
        assert_eq!(status.total_sessions, 2);
    }

    #[test]
    fn error_log_is_capped() {
        let state = state();
        for i in 0..(MAX_RECENT_ERRORS + 5) {
            state.push_error_with_code(format!("err {i}"), Some("upstream_unavailable".into()));
        }
        let errors = state.build_status().recent_errors;
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(errors[0].message, "err 5");
    }

    #[test]
    fn history_source_matches_variant() {
        let state = state();
        assert_eq!(state.history_source(FeedVariant::Kline).variant(), FeedVariant::Kline);
        assert_eq!(
            state.history_source(FeedVariant::Enriched).variant(),
            FeedVariant::Enriched
        );
    }
}
