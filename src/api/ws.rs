// =============================================================================
// WebSocket Handler — one chart instance per connection
// =============================================================================
//
// Clients connect to `/api/v1/chart` and drive a datafeed with JSON ops:
//
//   { "op": "open", "variant": "kline", "props": { "mintInfo": {...} } }
//   { "op": "resolve", "symbol": "<pool id>" }
//   { "op": "getBars", "requestId": 1, "symbol": "..", "resolution": "5",
//     "from": 1700000000, "to": 1700003600, "firstDataRequest": true }
//   { "op": "subscribe", "symbol": "..", "resolution": "5", "subscriberId": "s1" }
//   { "op": "unsubscribe", "subscriberId": "s1" }
//   { "op": "awaitData" }
//   { "op": "setPreferences", "resolution": "15", "theme": "light" }
//   { "op": "search", "query": "PUMP" }
//
// Replies and pushes are tagged by `type`: opened, resolved, bars, bar,
// readiness, searchResults, error. History requests go through one queue task
// per connection, so they run in the order the client sent them and a slow
// page never blocks live bars; their results come back through the outbound
// channel. Closing the socket disposes the datafeed.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::chart_config::{ChartPreferences, SharedPreferences};
use crate::datafeed::{BarSink, BarUpdate, ChartProps, Datafeed, DatafeedConfiguration, PeriodParams, SymbolInfo};
use crate::error::FeedError;
use crate::readiness::Readiness;
use crate::resolution::bucket_seconds_of;
use crate::task::TaskHandle;
use crate::types::{Bar, FeedVariant, Theme};

// =============================================================================
// Protocol
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum ClientOp {
    Open {
        #[serde(default)]
        variant: FeedVariant,
        #[serde(default)]
        props: ChartProps,
    },
    Resolve {
        symbol: String,
    },
    #[serde(rename_all = "camelCase")]
    GetBars {
        request_id: u64,
        symbol: String,
        resolution: String,
        from: i64,
        to: i64,
        #[serde(default)]
        first_data_request: bool,
    },
    #[serde(rename_all = "camelCase")]
    Subscribe {
        symbol: String,
        resolution: String,
        subscriber_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Unsubscribe {
        subscriber_id: String,
    },
    AwaitData,
    SetPreferences {
        #[serde(default)]
        resolution: Option<String>,
        #[serde(default)]
        theme: Option<Theme>,
    },
    Search {
        #[serde(default)]
        query: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Opened {
        session_id: String,
        config: DatafeedConfiguration,
        resolution: String,
        preferences: ChartPreferences,
    },
    Resolved {
        symbol: SymbolInfo,
    },
    #[serde(rename_all = "camelCase")]
    Bars {
        request_id: u64,
        bars: Vec<Bar>,
        no_data: bool,
    },
    #[serde(rename_all = "camelCase")]
    Bar {
        subscriber_id: String,
        bar: Bar,
    },
    Readiness {
        outcome: Readiness,
    },
    SearchResults {
        symbols: Vec<SymbolInfo>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        request_id: Option<u64>,
        code: &'static str,
        message: String,
    },
}

impl ServerMessage {
    fn error(request_id: Option<u64>, err: &FeedError) -> Self {
        Self::Error {
            request_id,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<BarUpdate> for ServerMessage {
    fn from(update: BarUpdate) -> Self {
        Self::Bar {
            subscriber_id: update.subscriber_id,
            bar: update.bar,
        }
    }
}

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

pub async fn chart_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_chart_session(socket, state))
}

// =============================================================================
// History queue
// =============================================================================

/// One `getBars` op waiting its turn.
struct HistoryRequest {
    datafeed: Arc<Datafeed>,
    request_id: u64,
    symbol: String,
    resolution: String,
    period: PeriodParams,
}

/// Serve a connection's history requests one at a time, in arrival order.
async fn run_history_queue(
    mut requests: mpsc::UnboundedReceiver<HistoryRequest>,
    out: mpsc::UnboundedSender<ServerMessage>,
    state: Arc<AppState>,
) {
    while let Some(req) = requests.recv().await {
        let msg = match req.datafeed.get_bars(&req.symbol, &req.resolution, req.period).await {
            Ok(batch) => ServerMessage::Bars {
                request_id: req.request_id,
                bars: batch.bars,
                no_data: batch.no_data,
            },
            Err(e) => {
                if matches!(e, FeedError::UpstreamUnavailable(_)) {
                    state.push_error_with_code(e.to_string(), Some(e.code().to_string()));
                }
                ServerMessage::error(Some(req.request_id), &e)
            }
        };
        if out.send(msg).is_err() {
            break;
        }
    }
}

// =============================================================================
// Session
// =============================================================================

struct ChartSession {
    datafeed: Arc<Datafeed>,
    prefs: SharedPreferences,
}

/// Per-connection state the op handlers work against.
struct SessionCtx {
    id: Uuid,
    state: Arc<AppState>,
    chart: Option<ChartSession>,
    out: mpsc::UnboundedSender<ServerMessage>,
    bars: BarSink,
    history: mpsc::UnboundedSender<HistoryRequest>,
}

impl SessionCtx {
    fn reply(&self, msg: ServerMessage) {
        // The receiver lives in the connection loop; a failed send means the
        // loop is already shutting down.
        let _ = self.out.send(msg);
    }

    fn fail(&self, request_id: Option<u64>, err: FeedError) {
        if matches!(err, FeedError::UpstreamUnavailable(_)) {
            self.state
                .push_error_with_code(err.to_string(), Some(err.code().to_string()));
        }
        self.reply(ServerMessage::error(request_id, &err));
    }

    fn datafeed(&self, request_id: Option<u64>) -> Option<Arc<Datafeed>> {
        match &self.chart {
            Some(chart) => Some(chart.datafeed.clone()),
            None => {
                self.reply(ServerMessage::Error {
                    request_id,
                    code: "no_chart",
                    message: "send an `open` op first".into(),
                });
                None
            }
        }
    }

    fn close_chart(&mut self) {
        if let Some(chart) = self.chart.take() {
            chart.datafeed.dispose();
        }
    }

    fn handle(&mut self, op: ClientOp) {
        match op {
            ClientOp::Open { variant, props } => self.open(variant, props),

            ClientOp::Resolve { symbol } => {
                let Some(datafeed) = self.datafeed(None) else { return };
                match datafeed.resolve_symbol(&symbol) {
                    Ok(info) => self.reply(ServerMessage::Resolved { symbol: info }),
                    Err(e) => self.fail(None, e),
                }
            }

            ClientOp::GetBars {
                request_id,
                symbol,
                resolution,
                from,
                to,
                first_data_request,
            } => {
                let Some(datafeed) = self.datafeed(Some(request_id)) else { return };
                let queued = self.history.send(HistoryRequest {
                    datafeed,
                    request_id,
                    symbol,
                    resolution,
                    period: PeriodParams {
                        from,
                        to,
                        first_data_request,
                    },
                });
                if queued.is_err() {
                    warn!(session_id = %self.id, request_id, "history queue is gone");
                }
            }

            ClientOp::Subscribe {
                symbol,
                resolution,
                subscriber_id,
            } => {
                let Some(datafeed) = self.datafeed(None) else { return };
                if let Err(e) =
                    datafeed.subscribe_bars(&symbol, &resolution, &subscriber_id, self.bars.clone())
                {
                    self.fail(None, e);
                }
            }

            ClientOp::Unsubscribe { subscriber_id } => {
                if let Some(chart) = &self.chart {
                    chart.datafeed.unsubscribe_bars(&subscriber_id);
                }
            }

            ClientOp::AwaitData => {
                let Some(datafeed) = self.datafeed(None) else { return };
                let out = self.out.clone();
                match datafeed.watch_readiness(move |outcome| {
                    let _ = out.send(ServerMessage::Readiness { outcome });
                }) {
                    // Enriched charts are not gated.
                    Ok(false) => self.reply(ServerMessage::Readiness {
                        outcome: Readiness::Ready { attempts: 0 },
                    }),
                    Ok(true) => {}
                    Err(e) => self.fail(None, e),
                }
            }

            ClientOp::SetPreferences { resolution, theme } => {
                let Some(chart) = &self.chart else { return };
                if let Some(label) = &resolution {
                    match bucket_seconds_of(label) {
                        Ok(width) => debug!(
                            session_id = %self.id,
                            resolution = %label,
                            bucket_seconds = width,
                            "resolution preference set"
                        ),
                        Err(e) => return self.fail(None, e),
                    }
                }
                let mut prefs = chart.prefs.lock();
                if resolution.is_some() {
                    prefs.resolution = resolution;
                }
                if let Some(theme) = theme {
                    prefs.theme = theme;
                }
            }

            ClientOp::Search { query } => {
                let Some(datafeed) = self.datafeed(None) else { return };
                self.reply(ServerMessage::SearchResults {
                    symbols: datafeed.search_symbols(&query),
                });
            }
        }
    }

    fn open(&mut self, variant: FeedVariant, props: ChartProps) {
        self.close_chart();

        let store = self.state.chart_config.clone();
        let preferences = store.preferences(variant);
        let resolution = store.initial_resolution(variant);
        let prefs: SharedPreferences = Arc::new(Mutex::new(preferences.clone()));

        let datafeed = Arc::new(self.state.open_datafeed(variant, props));
        datafeed.start_autosave(store, prefs.clone());
        info!(session_id = %self.id, variant = %variant, resolution = %resolution, "chart opened");

        self.reply(ServerMessage::Opened {
            session_id: self.id.to_string(),
            config: datafeed.on_ready(),
            resolution,
            preferences,
        });
        self.chart = Some(ChartSession { datafeed, prefs });
    }
}

// =============================================================================
// Connection handler
// =============================================================================

/// Runs one chart session until the socket closes, multiplexing client ops,
/// live bars and finished history requests via `tokio::select!`.
async fn handle_chart_session(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (bar_tx, mut bar_rx) = mpsc::unbounded_channel::<BarUpdate>();
    let (history_tx, history_rx) = mpsc::unbounded_channel::<HistoryRequest>();

    let _history_queue = TaskHandle::spawn(
        "history-queue",
        run_history_queue(history_rx, out_tx.clone(), state.clone()),
    );

    let mut ctx = SessionCtx {
        id: Uuid::new_v4(),
        state: state.clone(),
        chart: None,
        out: out_tx,
        bars: bar_tx,
        history: history_tx,
    };
    state.session_opened();
    info!(session_id = %ctx.id, "chart session connected");

    loop {
        tokio::select! {
            Some(update) = bar_rx.recv() => {
                if let Err(e) = send_message(&mut sender, &ServerMessage::from(update)).await {
                    debug!(error = %e, "WebSocket send failed — disconnecting");
                    break;
                }
            }

            Some(msg) = out_rx.recv() => {
                if let Err(e) = send_message(&mut sender, &msg).await {
                    debug!(error = %e, "WebSocket send failed — disconnecting");
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientOp>(text.as_str()) {
                            Ok(op) => {
                                debug!(session_id = %ctx.id, ?op, "chart op");
                                ctx.handle(op);
                            }
                            Err(e) => {
                                warn!(session_id = %ctx.id, error = %e, "malformed chart op");
                                ctx.reply(ServerMessage::Error {
                                    request_id: None,
                                    code: "bad_request",
                                    message: e.to_string(),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        debug!("WebSocket binary message ignored");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(session_id = %ctx.id, "WebSocket Close frame received");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    ctx.close_chart();
    state.session_closed();
    info!(session_id = %ctx.id, "chart session closed");
}

/// Serialize and send one message.
async fn send_message<S>(sender: &mut S, msg: &ServerMessage) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            // Serialisation errors are not network errors; don't disconnect.
            warn!(error = %e, "Failed to serialize chart message");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datafeed::{DatafeedSettings, MintInfo};
    use crate::runtime_config::RuntimeConfig;
    use crate::testing::{kline_page, kline_row, ChannelTransport, MockSource};

    fn app_state() -> Arc<AppState> {
        Arc::new(AppState::new(RuntimeConfig {
            chart_config_path: std::env::temp_dir()
                .join(format!("ws-prefs-{}.json", Uuid::new_v4()))
                .display()
                .to_string(),
            ..RuntimeConfig::default()
        }))
    }

    fn kline_datafeed(source: Arc<MockSource>) -> Arc<Datafeed> {
        let props = ChartProps {
            mint_info: Some(MintInfo {
                mint: "BASEMINT".into(),
                symbol: "PUMP".into(),
                decimals: 6,
                supply: 1_000.0,
                quote: None,
            }),
            curve_type: None,
        };
        Arc::new(Datafeed::new(
            DatafeedSettings::default(),
            props,
            source,
            Arc::new(ChannelTransport::new()),
        ))
    }

    fn history(datafeed: &Arc<Datafeed>, request_id: u64, first_data_request: bool) -> HistoryRequest {
        HistoryRequest {
            datafeed: datafeed.clone(),
            request_id,
            symbol: "P".into(),
            resolution: "1".into(),
            period: PeriodParams {
                from: 0,
                to: 240,
                first_data_request,
            },
        }
    }

    #[tokio::test]
    async fn history_requests_are_served_in_send_order() {
        let source = Arc::new(
            MockSource::new(FeedVariant::Kline)
                .with_page(Ok(kline_page(
                    vec![kline_row(180, 1.0, 1.0, 1.0, 1.0), kline_row(120, 1.0, 1.0, 1.0, 1.0)],
                    Some("k1"),
                )))
                .with_page(Ok(kline_page(
                    vec![kline_row(60, 1.0, 1.0, 1.0, 1.0), kline_row(0, 1.0, 1.0, 1.0, 1.0)],
                    None,
                ))),
        );
        let datafeed = kline_datafeed(source.clone());
        datafeed.resolve_symbol("P").unwrap();

        let (history_tx, history_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        history_tx.send(history(&datafeed, 1, true)).unwrap();
        history_tx.send(history(&datafeed, 2, false)).unwrap();
        drop(history_tx);

        run_history_queue(history_rx, out_tx, app_state()).await;

        let mut served = Vec::new();
        while let Some(msg) = out_rx.recv().await {
            match msg {
                ServerMessage::Bars {
                    request_id,
                    bars,
                    no_data,
                } => served.push((request_id, bars.first().map(|b| b.time), no_data)),
                other => panic!("unexpected message {other:?}"),
            }
        }
        assert_eq!(served, vec![(1, Some(120_000), false), (2, Some(0), false)]);
        assert_eq!(source.cursors(), vec![None, Some("k1".to_string())]);
    }

    #[tokio::test]
    async fn upstream_failures_reach_the_error_log() {
        let source = Arc::new(
            MockSource::new(FeedVariant::Kline)
                .with_page(Err(FeedError::UpstreamUnavailable("502".into()))),
        );
        let datafeed = kline_datafeed(source);
        datafeed.resolve_symbol("P").unwrap();
        let state = app_state();

        let (history_tx, history_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        history_tx.send(history(&datafeed, 9, true)).unwrap();
        drop(history_tx);

        run_history_queue(history_rx, out_tx, state.clone()).await;

        let json = serde_json::to_value(out_rx.recv().await.unwrap()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["requestId"], 9);
        assert_eq!(json["code"], "upstream_unavailable");
        assert_eq!(state.build_status().recent_errors.len(), 1);
    }

    #[test]
    fn search_op_parses_and_replies_with_symbols() {
        let op: ClientOp = serde_json::from_str(r#"{"op":"search","query":"PUMP"}"#).unwrap();
        assert!(matches!(op, ClientOp::Search { query } if query == "PUMP"));

        let json = serde_json::to_value(ServerMessage::SearchResults { symbols: Vec::new() }).unwrap();
        assert_eq!(json["type"], "searchResults");
        assert_eq!(json["symbols"], serde_json::json!([]));
    }

    #[test]
    fn ops_parse_from_camel_case_json() {
        let op: ClientOp = serde_json::from_str(
            r#"{"op":"getBars","requestId":7,"symbol":"P","resolution":"5","from":10,"to":20,"firstDataRequest":true}"#,
        )
        .unwrap();
        match op {
            ClientOp::GetBars {
                request_id,
                first_data_request,
                ..
            } => {
                assert_eq!(request_id, 7);
                assert!(first_data_request);
            }
            other => panic!("unexpected op {other:?}"),
        }

        let op: ClientOp = serde_json::from_str(r#"{"op":"awaitData"}"#).unwrap();
        assert!(matches!(op, ClientOp::AwaitData));

        let op: ClientOp = serde_json::from_str(
            r#"{"op":"open","variant":"enriched","props":{"mintInfo":{"mint":"M","symbol":"S","decimals":6}}}"#,
        )
        .unwrap();
        match op {
            ClientOp::Open { variant, props } => {
                assert_eq!(variant, FeedVariant::Enriched);
                assert_eq!(props.mint_info.map(|m| m.decimals), Some(6));
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn errors_carry_stable_codes() {
        let msg = ServerMessage::error(Some(3), &FeedError::UnknownResolution("7".into()));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["requestId"], 3);
        assert_eq!(json["code"], "unknown_resolution");
    }

    #[test]
    fn live_bars_are_tagged_with_subscriber() {
        let msg = ServerMessage::from(BarUpdate {
            subscriber_id: "s1".into(),
            bar: Bar {
                time: 60_000,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: None,
            },
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "bar");
        assert_eq!(json["subscriberId"], "s1");
        assert_eq!(json["bar"]["time"], 60_000);
        assert!(json["bar"].get("volume").is_none());
    }

    #[test]
    fn readiness_outcome_serialises_with_state_tag() {
        let json = serde_json::to_value(ServerMessage::Readiness {
            outcome: Readiness::Empty,
        })
        .unwrap();
        assert_eq!(json["type"], "readiness");
        assert_eq!(json["outcome"]["state"], "empty");
    }
}
