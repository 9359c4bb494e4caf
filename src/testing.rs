//! Test doubles for the history source and live transport.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::error::FeedError;
use crate::live::{LiveConnection, LiveEvent, LiveTransport};
use crate::market_data::{EnrichedRow, KlineRow};
use crate::upstream::{HistorySource, Page, PageRequest, RawSamples};
use crate::types::FeedVariant;

pub fn kline_row(t: i64, o: f64, h: f64, l: f64, c: f64) -> KlineRow {
    KlineRow {
        t,
        o,
        h,
        l,
        c,
        pool_id: None,
        v_a: 0.0,
        v_b: 0.0,
        v_u: 0.0,
    }
}

pub fn enriched_row(unix_time: i64, o: f64, h: f64, l: f64, c: f64, v_quote: f64) -> EnrichedRow {
    EnrichedRow {
        unix_time,
        o,
        h,
        l,
        c,
        v_quote,
    }
}

pub fn kline_page(rows: Vec<KlineRow>, next: Option<&str>) -> Page {
    Page {
        samples: RawSamples::Kline(rows),
        next_cursor: next.map(str::to_string),
    }
}

/// Scripted history source. Pages are served in order; once the script runs
/// out every fetch returns an empty page.
pub struct MockSource {
    variant: FeedVariant,
    pages: Mutex<VecDeque<Result<Page, FeedError>>>,
    cursors: Mutex<Vec<Option<String>>>,
    fetches: AtomicU32,
    probes: AtomicU32,
    ready_after: Option<u32>,
    hold: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl MockSource {
    pub fn new(variant: FeedVariant) -> Self {
        Self {
            variant,
            pages: Mutex::new(VecDeque::new()),
            cursors: Mutex::new(Vec::new()),
            fetches: AtomicU32::new(0),
            probes: AtomicU32::new(0),
            ready_after: Some(1),
            hold: None,
        }
    }

    pub fn with_page(self, page: Result<Page, FeedError>) -> Self {
        self.pages.lock().push_back(page);
        self
    }

    /// `Some(n)`: the n-th probe reports data. `None`: never.
    pub fn with_ready_after(mut self, probes: Option<u32>) -> Self {
        self.ready_after = probes;
        self
    }

    /// Each fetch signals `entered` and then waits for `release`.
    pub fn with_hold(mut self, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.hold = Some((entered, release));
        self
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().clone()
    }
}

#[async_trait]
impl HistorySource for MockSource {
    fn variant(&self) -> FeedVariant {
        self.variant
    }

    async fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Page, FeedError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.cursors.lock().push(request.cursor.map(str::to_string));

        if let Some((entered, release)) = &self.hold {
            entered.notify_one();
            release.notified().await;
        }

        let scripted = self.pages.lock().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(Page {
                samples: match self.variant {
                    FeedVariant::Kline => RawSamples::Kline(Vec::new()),
                    FeedVariant::Enriched => RawSamples::Enriched(Vec::new()),
                },
                next_cursor: None,
            })
        })
    }

    async fn has_data(&self, _pool_id: &str) -> bool {
        let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        self.ready_after.is_some_and(|after| n >= after)
    }
}

/// In-memory live transport. Tests push events with [`emit`](Self::emit) and
/// inspect the open/close log.
#[derive(Default)]
pub struct ChannelTransport {
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<LiveEvent>>>,
    log: Mutex<Vec<String>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` on its pool's connection. `false` if none is open.
    pub fn emit(&self, event: LiveEvent) -> bool {
        match self.senders.lock().get(&event.pool_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

impl LiveTransport for ChannelTransport {
    fn open(&self, pool_id: &str) -> LiveConnection {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().insert(pool_id.to_string(), tx);
        self.log.lock().push(format!("open {pool_id}"));
        LiveConnection::new(pool_id, rx, None)
    }

    fn close(&self, mut connection: LiveConnection) {
        self.senders.lock().remove(connection.pool_id());
        self.log.lock().push(format!("close {}", connection.pool_id()));
        connection.shutdown();
    }
}

pub fn live_event(pool_id: &str, time: i64, open: f64, high: f64, low: f64, close: f64) -> LiveEvent {
    LiveEvent {
        pool_id: pool_id.to_string(),
        time,
        open,
        high,
        low,
        close,
    }
}
