// =============================================================================
// Datafeed Orchestrator — one chart instance's view of a pool
// =============================================================================
//
// Owns everything a single chart session needs: the resolved symbol, the
// pagination cursor, the last-bar cache, the live connection and its event
// router, the live subscriptions, and the readiness / autosave timers.
//
// State machine: Idle -> Resolving -> Ready -> TornDown.
//
// Guards:
//   - `get_bars` calls run strictly one after another (`fetch_lock`).
//   - Every resolve and the final dispose bump `epoch`; a historical page
//     fetched under an older epoch is discarded, never committed.
//   - A failed page commits nothing: cursor and cache are only written after
//     a successful fetch.
// =============================================================================

pub mod symbol;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chart_config::{autosave_tick, ChartConfigStore, SharedPreferences};
use crate::error::FeedError;
use crate::live::{LiveConnection, LiveEvent, LiveTransport};
use crate::market_data::{
    Bucketer, EnrichedAggregation, KlineAggregation, LastBarCache, LiveBarMerger, PaginationCursor,
};
use crate::readiness::{Readiness, ReadinessGate};
use crate::resolution::{Resolution, DATAFEED_RESOLUTIONS};
use crate::task::TaskHandle;
use crate::types::{Bar, FeedVariant};
use crate::upstream::{HistorySource, PageRequest, RawSamples};

pub use symbol::{MintInfo, SymbolContext, SymbolInfo};

/// Price of a launchpad pool at creation, in quote units per base token.
/// A pool's very first page is never drawn opening above it.
pub const INIT_POOL_PRICE: f64 = 0.000_000_028;

// =============================================================================
// Public shapes
// =============================================================================

/// Capabilities advertised to the charting widget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatafeedConfiguration {
    pub supported_resolutions: Vec<String>,
    pub exchanges: Vec<String>,
    pub symbols_types: Vec<String>,
    pub supports_group_request: bool,
    pub supports_marks: bool,
    pub supports_search: bool,
    pub supports_timescale_marks: bool,
}

impl Default for DatafeedConfiguration {
    fn default() -> Self {
        Self {
            supported_resolutions: DATAFEED_RESOLUTIONS.iter().map(|r| r.to_string()).collect(),
            exchanges: Vec::new(),
            symbols_types: Vec::new(),
            supports_group_request: true,
            supports_marks: false,
            supports_search: false,
            supports_timescale_marks: false,
        }
    }
}

/// Requested history window, unix seconds `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PeriodParams {
    pub from: i64,
    pub to: i64,
    #[serde(rename = "firstDataRequest", default)]
    pub first_data_request: bool,
}

/// Result of one historical read. `no_data` is a terminal state, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryBatch {
    /// Ascending by `time`.
    pub bars: Vec<Bar>,
    #[serde(rename = "noData")]
    pub no_data: bool,
}

impl HistoryBatch {
    pub fn no_data() -> Self {
        Self {
            bars: Vec::new(),
            no_data: true,
        }
    }
}

/// A live bar addressed to one subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct BarUpdate {
    pub subscriber_id: String,
    pub bar: Bar,
}

pub type BarSink = mpsc::UnboundedSender<BarUpdate>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Idle,
    Resolving,
    Ready,
    TornDown,
}

/// Chart props the host passes when it opens a chart.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartProps {
    #[serde(default)]
    pub mint_info: Option<MintInfo>,
    #[serde(default)]
    pub curve_type: Option<u8>,
}

/// Per-session tunables taken from the runtime config.
#[derive(Debug, Clone)]
pub struct DatafeedSettings {
    pub page_limit: u32,
    /// Caps `open`/`low` of a kline page that folds into a single bar.
    pub init_price_floor: f64,
    pub readiness: ReadinessGate,
    pub autosave_interval: Duration,
}

impl Default for DatafeedSettings {
    fn default() -> Self {
        Self {
            page_limit: 300,
            init_price_floor: INIT_POOL_PRICE,
            readiness: ReadinessGate::default(),
            autosave_interval: Duration::from_secs(1),
        }
    }
}

// =============================================================================
// Session state
// =============================================================================

struct Subscription {
    symbol: String,
    merger: LiveBarMerger,
    sink: BarSink,
}

type Subscriptions = Arc<Mutex<HashMap<String, Subscription>>>;

struct Session {
    state: FeedState,
    active: Option<SymbolContext>,
    cursor: PaginationCursor,
    last_bars: LastBarCache,
    connection: Option<LiveConnection>,
    router: Option<TaskHandle>,
    readiness: Option<TaskHandle>,
    autosave: Option<TaskHandle>,
}

impl Session {
    fn new() -> Self {
        Self {
            state: FeedState::Idle,
            active: None,
            cursor: PaginationCursor::default(),
            last_bars: LastBarCache::new(),
            connection: None,
            router: None,
            readiness: None,
            autosave: None,
        }
    }

    /// Context of `symbol_id` if it is the resolved symbol.
    fn context_for(&self, symbol_id: &str) -> Result<&SymbolContext, FeedError> {
        if self.state == FeedState::TornDown {
            return Err(FeedError::Disposed);
        }
        self.active
            .as_ref()
            .filter(|ctx| ctx.pool_id == symbol_id)
            .ok_or_else(|| FeedError::CannotResolveSymbol(format!("{symbol_id} is not resolved")))
    }
}

// =============================================================================
// Datafeed
// =============================================================================

pub struct Datafeed {
    settings: DatafeedSettings,
    props: ChartProps,
    source: Arc<dyn HistorySource>,
    transport: Arc<dyn LiveTransport>,
    session: Mutex<Session>,
    subscriptions: Subscriptions,
    fetch_lock: tokio::sync::Mutex<()>,
    epoch: Arc<AtomicU64>,
}

impl Datafeed {
    pub fn new(
        settings: DatafeedSettings,
        props: ChartProps,
        source: Arc<dyn HistorySource>,
        transport: Arc<dyn LiveTransport>,
    ) -> Self {
        Self {
            settings,
            props,
            source,
            transport,
            session: Mutex::new(Session::new()),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            fetch_lock: tokio::sync::Mutex::new(()),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn variant(&self) -> FeedVariant {
        self.source.variant()
    }

    pub fn on_ready(&self) -> DatafeedConfiguration {
        DatafeedConfiguration::default()
    }

    /// Pools are opened by id; search always comes back empty.
    pub fn search_symbols(&self, query: &str) -> Vec<SymbolInfo> {
        debug!(query, "symbol search is not supported");
        Vec::new()
    }

    // ── Resolve ─────────────────────────────────────────────────────────

    /// Resolve `symbol_name` and (for kline charts) open its live connection.
    ///
    /// Any previous connection is closed before the new one is opened, the
    /// pagination cursor is reset, and subscriptions for other symbols are
    /// dropped.
    pub fn resolve_symbol(&self, symbol_name: &str) -> Result<SymbolInfo, FeedError> {
        let mut session = self.session.lock();
        if session.state == FeedState::TornDown {
            return Err(FeedError::Disposed);
        }
        let previous = session.state;
        session.state = FeedState::Resolving;
        info!(symbol = symbol_name, variant = %self.variant(), "resolving symbol");

        let described = match &self.props.mint_info {
            Some(mint) => symbol::describe(symbol_name, mint, self.variant(), self.props.curve_type),
            None => Err(FeedError::CannotResolveSymbol(format!(
                "{symbol_name}: chart has no mint info"
            ))),
        };
        let (info, context) = match described {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(symbol = symbol_name, error = %e, "symbol resolution failed");
                session.state = previous;
                return Err(e);
            }
        };

        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(mut readiness) = session.readiness.take() {
            readiness.cancel();
        }
        self.close_connection(&mut session);
        session.cursor.reset();
        self.subscriptions
            .lock()
            .retain(|_, sub| sub.symbol == context.pool_id);

        if context.variant == FeedVariant::Kline {
            let mut connection = self.transport.open(&context.pool_id);
            session.router = connection.take_events().map(|events| {
                TaskHandle::spawn(
                    "live-router",
                    route_live_events(context.pool_id.clone(), events, self.subscriptions.clone()),
                )
            });
            session.connection = Some(connection);
        }

        session.active = Some(context);
        session.state = FeedState::Ready;
        info!(symbol = symbol_name, ticker = %info.ticker, "symbol resolved");
        Ok(info)
    }

    fn close_connection(&self, session: &mut Session) {
        if let Some(mut router) = session.router.take() {
            router.cancel();
        }
        if let Some(connection) = session.connection.take() {
            info!(pool_id = connection.pool_id(), "closing live connection");
            self.transport.close(connection);
        }
    }

    // ── History ─────────────────────────────────────────────────────────

    /// Fetch and bucket one page of history for the resolved symbol.
    pub async fn get_bars(
        &self,
        symbol_id: &str,
        resolution_label: &str,
        period: PeriodParams,
    ) -> Result<HistoryBatch, FeedError> {
        let resolution = Resolution::from_label(resolution_label)?;
        let _in_flight = self.fetch_lock.lock().await;

        let (epoch, context, cursor) = {
            let mut session = self.session.lock();
            let context = session.context_for(symbol_id)?.clone();
            if period.first_data_request {
                session.cursor.reset();
            } else if session.cursor.next_key().is_none() {
                if session.cursor.is_exhausted() {
                    debug!(symbol = symbol_id, pages = session.cursor.pages(), "history exhausted");
                } else {
                    debug!(symbol = symbol_id, "no first page yet, nothing older to load");
                }
                return Ok(HistoryBatch::no_data());
            }
            let cursor = session.cursor.next_key().map(str::to_string);
            (self.epoch.load(Ordering::SeqCst), context, cursor)
        };

        debug!(
            symbol = symbol_id,
            resolution = %resolution,
            from = period.from,
            to = period.to,
            first = period.first_data_request,
            "requesting history page"
        );

        let request = PageRequest {
            symbol: &context,
            resolution,
            from: period.from,
            to: period.to,
            cursor: cursor.as_deref(),
            limit: self.settings.page_limit,
        };
        let page = match self.source.fetch_page(&request).await {
            Ok(page) => page,
            Err(e) => {
                self.ensure_current(self.session.lock().state, epoch, symbol_id)?;
                warn!(symbol = symbol_id, error = %e, "history page failed");
                return Err(e);
            }
        };

        let mut session = self.session.lock();
        self.ensure_current(session.state, epoch, symbol_id)?;

        session.cursor.advance(page.next_cursor);
        let rows = page.samples.row_count();
        let bars = self.bucket_page(&context, resolution, &period, page.samples);
        let Some(newest) = bars.last().copied() else {
            debug!(symbol = symbol_id, rows, "history page is empty");
            return Ok(HistoryBatch::no_data());
        };

        let malformed = bars.iter().filter(|bar| !bar.is_well_formed()).count();
        if malformed > 0 {
            warn!(symbol = symbol_id, malformed, "upstream rows produced bars with low/high out of range");
        }

        if period.first_data_request {
            session.last_bars.seed(symbol_id, newest);
        }
        info!(symbol = symbol_id, rows, bars = bars.len(), "history page served");
        Ok(HistoryBatch {
            bars,
            no_data: false,
        })
    }

    /// A page fetched under `epoch` may only be committed (or reported) while
    /// that epoch is still current.
    fn ensure_current(&self, state: FeedState, epoch: u64, symbol_id: &str) -> Result<(), FeedError> {
        if state == FeedState::TornDown {
            return Err(FeedError::Disposed);
        }
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(symbol = symbol_id, "discarding history page from a replaced session");
            return Err(FeedError::Superseded {
                symbol: symbol_id.to_string(),
            });
        }
        Ok(())
    }

    fn bucket_page(
        &self,
        context: &SymbolContext,
        resolution: Resolution,
        period: &PeriodParams,
        samples: RawSamples,
    ) -> Vec<Bar> {
        let width = resolution.bucket_seconds();
        match samples {
            RawSamples::Kline(rows) => Bucketer::new(width, KlineAggregation)
                .with_price_floor(self.settings.init_price_floor)
                .bucket_ascending(&rows),
            RawSamples::Enriched(rows) => {
                let aggregation = EnrichedAggregation::new(context.scale_multiplier)
                    .within(period.from, period.to);
                Bucketer::new(width, aggregation).bucket_ascending(&rows)
            }
        }
    }

    // ── Live ────────────────────────────────────────────────────────────

    /// Attach a live subscription seeded with the symbol's last historical
    /// bar. A no-op for enriched charts, which have no live tail.
    pub fn subscribe_bars(
        &self,
        symbol_id: &str,
        resolution_label: &str,
        subscriber_id: &str,
        sink: BarSink,
    ) -> Result<(), FeedError> {
        let resolution = Resolution::from_label(resolution_label)?;
        let session = self.session.lock();
        let context = session.context_for(symbol_id)?;

        if context.variant == FeedVariant::Enriched {
            debug!(symbol = symbol_id, subscriber_id, "enriched feed has no live tail");
            return Ok(());
        }

        let seed = session.last_bars.get(symbol_id);
        self.subscriptions.lock().insert(
            subscriber_id.to_string(),
            Subscription {
                symbol: symbol_id.to_string(),
                merger: LiveBarMerger::new(resolution, seed),
                sink,
            },
        );
        info!(
            symbol = symbol_id,
            subscriber_id,
            resolution = %resolution,
            seeded = seed.is_some(),
            "live subscription added"
        );
        Ok(())
    }

    /// Remove a subscription. Unknown ids are ignored.
    pub fn unsubscribe_bars(&self, subscriber_id: &str) {
        if self.subscriptions.lock().remove(subscriber_id).is_some() {
            info!(subscriber_id, "live subscription removed");
        } else {
            debug!(subscriber_id, "unsubscribe for unknown subscriber");
        }
    }

    // ── Timers ──────────────────────────────────────────────────────────

    /// Start the readiness gate for the resolved pool; `on_done` runs once
    /// with the outcome unless the session is replaced first. Returns
    /// `false` (and starts nothing) for enriched charts.
    pub fn watch_readiness<F>(&self, on_done: F) -> Result<bool, FeedError>
    where
        F: FnOnce(Readiness) + Send + 'static,
    {
        let mut session = self.session.lock();
        if session.state == FeedState::TornDown {
            return Err(FeedError::Disposed);
        }
        let context = session
            .active
            .as_ref()
            .ok_or_else(|| FeedError::CannotResolveSymbol("no symbol resolved".into()))?;
        if context.variant == FeedVariant::Enriched {
            return Ok(false);
        }

        let pool_id = context.pool_id.clone();
        let source = self.source.clone();
        let gate = self.settings.readiness;
        let epoch = self.epoch.clone();
        let started = epoch.load(Ordering::SeqCst);

        session.readiness = Some(TaskHandle::spawn("readiness-gate", async move {
            let outcome = gate.wait(source.as_ref(), &pool_id).await;
            if epoch.load(Ordering::SeqCst) == started {
                on_done(outcome);
            } else {
                debug!(pool_id = %pool_id, "discarding readiness outcome from a replaced session");
            }
        }));
        Ok(true)
    }

    /// Persist `prefs` into `store` every autosave period until teardown.
    pub fn start_autosave(&self, store: Arc<ChartConfigStore>, prefs: SharedPreferences) {
        let mut session = self.session.lock();
        if session.state == FeedState::TornDown {
            return;
        }
        let kind = self.variant();
        session.autosave = Some(TaskHandle::every(
            "chart-autosave",
            self.settings.autosave_interval,
            move || autosave_tick(&store, kind, &prefs),
        ));
    }

    // ── Teardown ────────────────────────────────────────────────────────

    /// Stop every timer, close the live connection and drop subscriptions.
    /// Repeated calls do nothing.
    pub fn dispose(&self) {
        let mut session = self.session.lock();
        if session.state == FeedState::TornDown {
            return;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);

        if let Some(mut readiness) = session.readiness.take() {
            readiness.cancel();
        }
        if let Some(mut autosave) = session.autosave.take() {
            autosave.cancel();
        }
        self.close_connection(&mut session);
        self.subscriptions.lock().clear();

        session.active = None;
        session.state = FeedState::TornDown;
        info!("datafeed disposed");
    }
}

#[cfg(test)]
impl Datafeed {
    pub fn state(&self) -> FeedState {
        self.session.lock().state
    }

    pub fn active_symbol(&self) -> Option<String> {
        self.session.lock().active.as_ref().map(|ctx| ctx.pool_id.clone())
    }

    pub fn last_bar(&self, symbol_id: &str) -> Option<Bar> {
        self.session.lock().last_bars.get(symbol_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

impl Drop for Datafeed {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Feed one pool's live events into the subscriptions for that pool, in
/// arrival order. Subscribers whose sink has gone away are dropped.
async fn route_live_events(
    pool_id: String,
    mut events: mpsc::UnboundedReceiver<LiveEvent>,
    subscriptions: Subscriptions,
) {
    while let Some(event) = events.recv().await {
        if event.pool_id != pool_id {
            debug!(expected = %pool_id, got = %event.pool_id, "ignoring event for another pool");
            continue;
        }

        subscriptions.lock().retain(|subscriber_id, sub| {
            if sub.symbol != pool_id {
                return true;
            }
            let Some(bar) = sub.merger.on_event(&event) else {
                return true;
            };
            let update = BarUpdate {
                subscriber_id: subscriber_id.clone(),
                bar,
            };
            if sub.sink.send(update).is_err() {
                debug!(subscriber_id = %subscriber_id, "subscriber gone, dropping subscription");
                return false;
            }
            true
        });
    }
    debug!(pool_id = %pool_id, "live event stream ended");
}
