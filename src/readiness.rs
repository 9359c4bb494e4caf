// =============================================================================
// Data-Readiness Gate — bounded wait for a fresh pool's first history row
// =============================================================================
//
// A freshly created pool has no history until its first trade is indexed.
// Before loading the chart, probe the history source once per interval until
// it reports data or the attempt budget runs out. Running out is not an error:
// the chart proceeds in the empty state. The wait is cancelled by dropping or
// aborting the future; no probe is issued after that.
// =============================================================================

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::upstream::HistorySource;

/// Default pause between probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);
/// Default probe budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 15;

/// How the wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Readiness {
    /// A probe reported data after `attempts` probes.
    Ready { attempts: u32 },
    /// The budget ran out without data.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessGate {
    interval: Duration,
    max_attempts: u32,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_INTERVAL, DEFAULT_MAX_ATTEMPTS)
    }
}

impl ReadinessGate {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Probe `source` for `pool_id` until it has data or the budget is spent.
    /// Each probe happens one interval after the previous one.
    pub async fn wait(&self, source: &dyn HistorySource, pool_id: &str) -> Readiness {
        for attempt in 1..=self.max_attempts {
            tokio::time::sleep(self.interval).await;

            if source.has_data(pool_id).await {
                info!(pool_id, attempt, "pool history is ready");
                return Readiness::Ready { attempts: attempt };
            }
            debug!(pool_id, attempt, max = self.max_attempts, "pool has no history yet");
        }

        info!(pool_id, attempts = self.max_attempts, "readiness budget exhausted — proceeding empty");
        Readiness::Empty
    }
}
