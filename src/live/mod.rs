// =============================================================================
// Live transport boundary
// =============================================================================
//
// A transport delivers discrete bar updates for one pool. The datafeed only
// triggers its lifecycle: `open` when a symbol resolves, `close` when the
// symbol changes or the chart goes away. Exactly one connection is open per
// chart instance at any time.
// =============================================================================

pub mod ws_transport;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::task::TaskHandle;

pub use ws_transport::WsTransport;

/// One real-time bar update for a pool. `time` is in unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    #[serde(rename = "poolId")]
    pub pool_id: String,
    #[serde(rename = "t")]
    pub time: i64,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
}

/// An open live connection for one pool.
///
/// Owns the receiving end of the event channel and the task feeding it.
#[derive(Debug)]
pub struct LiveConnection {
    pool_id: String,
    events: Option<mpsc::UnboundedReceiver<LiveEvent>>,
    task: Option<TaskHandle>,
}

impl LiveConnection {
    pub fn new(
        pool_id: impl Into<String>,
        events: mpsc::UnboundedReceiver<LiveEvent>,
        task: Option<TaskHandle>,
    ) -> Self {
        Self {
            pool_id: pool_id.into(),
            events: Some(events),
            task,
        }
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    /// Hand the event stream to a router. Only the first call gets it.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<LiveEvent>> {
        self.events.take()
    }

    /// Stop the feeding task and drop the event stream.
    pub fn shutdown(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.cancel();
        }
        self.events = None;
    }
}

/// Opens and closes per-pool live connections.
pub trait LiveTransport: Send + Sync {
    fn open(&self, pool_id: &str) -> LiveConnection;

    /// Consumes the connection, so each one is closed at most once.
    fn close(&self, connection: LiveConnection);
}
