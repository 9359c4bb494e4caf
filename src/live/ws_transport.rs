// =============================================================================
// WebSocket live transport
// =============================================================================
//
// One socket per pool. Frames are JSON bar updates:
//
//   { "poolId": "...", "t": 1700000000, "o": 1.0, "h": 1.2, "l": 0.9, "c": 1.1 }
//
// optionally wrapped in a `{ "data": { ... } }` envelope. The feeding task
// reconnects after a pause until the connection is closed.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::{LiveConnection, LiveEvent, LiveTransport};
use crate::task::TaskHandle;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Live transport over a per-pool WebSocket.
#[derive(Debug, Clone)]
pub struct WsTransport {
    /// URL with a `{pool_id}` placeholder.
    url_template: String,
}

impl WsTransport {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
        }
    }

    fn url_for(&self, pool_id: &str) -> String {
        self.url_template.replace("{pool_id}", pool_id)
    }
}

impl LiveTransport for WsTransport {
    fn open(&self, pool_id: &str) -> LiveConnection {
        let (tx, rx) = mpsc::unbounded_channel();
        let url = self.url_for(pool_id);
        let pool = pool_id.to_string();

        let task = TaskHandle::spawn("live-transport", async move {
            loop {
                match run_bar_stream(&url, &pool, &tx).await {
                    Ok(()) => {
                        if tx.is_closed() {
                            return;
                        }
                    }
                    Err(e) => {
                        error!(pool_id = %pool, error = %e, "live stream error — reconnecting in 5s");
                    }
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        });

        info!(pool_id, "live connection opened");
        LiveConnection::new(pool_id, rx, Some(task))
    }

    fn close(&self, mut connection: LiveConnection) {
        connection.shutdown();
        info!(pool_id = %connection.pool_id(), "live connection closed");
    }
}

/// Read bar updates from one socket session into `tx`.
///
/// Returns when the socket ends or every receiver is gone.
async fn run_bar_stream(
    url: &str,
    pool_id: &str,
    tx: &mpsc::UnboundedSender<LiveEvent>,
) -> Result<()> {
    info!(url = %url, pool_id = %pool_id, "connecting to live bar WebSocket");

    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to live bar WebSocket")?;

    debug!(pool_id = %pool_id, "live bar WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match parse_bar_update(&text) {
                Ok(event) if event.pool_id != pool_id => {
                    debug!(expected = %pool_id, got = %event.pool_id, "ignoring update for another pool");
                }
                Ok(event) => {
                    if tx.send(event).is_err() {
                        debug!(pool_id = %pool_id, "live receiver dropped — stopping stream");
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to parse live bar update");
                }
            },
            // tungstenite answers pings itself; other frames carry no bars.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                return Err(e).context("live bar WebSocket read error");
            }
            None => {
                warn!(pool_id = %pool_id, "live bar WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse one bar update, with or without a `data` envelope.
fn parse_bar_update(text: &str) -> Result<LiveEvent> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse live update JSON")?;

    let data = match root.get("data") {
        Some(inner) if inner.is_object() => inner.clone(),
        _ => root,
    };

    serde_json::from_value(data).context("live update is missing bar fields")
}
