// =============================================================================
// Bar Bucketer — folds raw upstream rows into fixed-width OHLCV bars
// =============================================================================
//
// One accumulator bar is open at a time. Every row is assigned to the bucket
// `floor(ts / width) * width`; a change of bucket closes the accumulator and
// opens a fresh one. The two upstream feeds differ in row shape, scaling and
// native ordering, so each gets its own `Aggregation` strategy. Rows are folded
// in the order the feed delivered them and are never re-sorted.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::resolution::bucket_start;
use crate::types::Bar;

// ---------------------------------------------------------------------------
// Raw samples
// ---------------------------------------------------------------------------

/// One row of the kline history service (`t` in unix seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KlineRow {
    pub t: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    #[serde(default, rename = "poolId", skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<String>,
    #[serde(default, rename = "vA")]
    pub v_a: f64,
    #[serde(default, rename = "vB")]
    pub v_b: f64,
    #[serde(default, rename = "vU")]
    pub v_u: f64,
}

/// One row of the enriched OHLCV feed (`unixTime` in seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedRow {
    #[serde(rename = "unixTime")]
    pub unix_time: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    #[serde(default, rename = "vQuote")]
    pub v_quote: f64,
}

// ---------------------------------------------------------------------------
// Aggregation strategies
// ---------------------------------------------------------------------------

/// Per-feed folding rules used by [`Bucketer`].
pub trait Aggregation {
    type Sample;

    /// Whether the feed delivers rows newest-first.
    const NEWEST_FIRST: bool;

    /// Sample timestamp in unix seconds.
    fn timestamp(&self, sample: &Self::Sample) -> i64;

    /// Rows rejected here are skipped before bucketing.
    fn accepts(&self, _sample: &Self::Sample) -> bool {
        true
    }

    fn open_bar(&self, sample: &Self::Sample, time_ms: i64) -> Bar;

    fn fold(&self, bar: &mut Bar, sample: &Self::Sample);

    /// Whether a row whose bucket starts at `bucket_ms` closes `current`.
    fn closes(&self, bucket_ms: i64, current: &Bar) -> bool;
}

/// Kline feed: rows arrive newest-first and carry no usable volume.
#[derive(Debug, Clone, Copy, Default)]
pub struct KlineAggregation;

impl Aggregation for KlineAggregation {
    type Sample = KlineRow;
    const NEWEST_FIRST: bool = true;

    fn timestamp(&self, sample: &KlineRow) -> i64 {
        sample.t
    }

    fn open_bar(&self, row: &KlineRow, time_ms: i64) -> Bar {
        Bar {
            time: time_ms,
            open: row.o,
            high: row.o.max(row.h).max(row.l).max(row.c),
            low: row.o.min(row.h).min(row.l).min(row.c),
            close: row.c,
            volume: None,
        }
    }

    fn fold(&self, bar: &mut Bar, row: &KlineRow) {
        bar.close = row.c;
        bar.low = bar.low.min(row.l);
        bar.high = bar.high.max(row.h);
    }

    // Descending feed: only an earlier bucket closes the accumulator. A later
    // bucket interleaved into a descending page is folded into the current bar.
    fn closes(&self, bucket_ms: i64, current: &Bar) -> bool {
        bucket_ms < current.time
    }
}

/// Enriched feed: ascending rows, quote volume, optional price scaling and an
/// optional `[from, to)` window.
#[derive(Debug, Clone, Copy)]
pub struct EnrichedAggregation {
    multiplier: f64,
    window: Option<(i64, i64)>,
}

impl EnrichedAggregation {
    pub fn new(scale_multiplier: Option<f64>) -> Self {
        Self {
            multiplier: scale_multiplier.unwrap_or(1.0),
            window: None,
        }
    }

    /// Only rows with `from <= unixTime < to` are bucketed.
    pub fn within(mut self, from: i64, to: i64) -> Self {
        self.window = Some((from, to));
        self
    }
}

impl Aggregation for EnrichedAggregation {
    type Sample = EnrichedRow;
    const NEWEST_FIRST: bool = false;

    fn timestamp(&self, sample: &EnrichedRow) -> i64 {
        sample.unix_time
    }

    fn accepts(&self, row: &EnrichedRow) -> bool {
        match self.window {
            Some((from, to)) => row.unix_time >= from && row.unix_time < to,
            None => true,
        }
    }

    fn open_bar(&self, row: &EnrichedRow, time_ms: i64) -> Bar {
        let m = self.multiplier;
        Bar {
            time: time_ms,
            open: row.o * m,
            high: row.h * m,
            low: row.l * m,
            close: row.c * m,
            volume: Some(row.v_quote),
        }
    }

    fn fold(&self, bar: &mut Bar, row: &EnrichedRow) {
        let m = self.multiplier;
        bar.close = row.c * m;
        bar.low = bar.low.min(row.l * m);
        bar.high = bar.high.max(row.h * m);
        bar.volume = Some(bar.volume.unwrap_or(0.0) + row.v_quote);
    }

    fn closes(&self, bucket_ms: i64, current: &Bar) -> bool {
        bucket_ms > current.time
    }
}

// ---------------------------------------------------------------------------
// Bucketer
// ---------------------------------------------------------------------------

/// Folds a page of raw rows into bars using one [`Aggregation`] strategy.
#[derive(Debug, Clone)]
pub struct Bucketer<A> {
    width_secs: i64,
    aggregation: A,
    price_floor: Option<f64>,
}

impl<A: Aggregation> Bucketer<A> {
    pub fn new(width_secs: i64, aggregation: A) -> Self {
        Self {
            width_secs: width_secs.max(1),
            aggregation,
            price_floor: None,
        }
    }

    /// When a page folds into exactly one bar, cap its `open` and `low` at
    /// `floor`. Guards the chart against a malformed first print on a pool
    /// that has not traded yet.
    pub fn with_price_floor(mut self, floor: f64) -> Self {
        self.price_floor = Some(floor);
        self
    }

    /// Bars in the feed's native order.
    pub fn bucket(&self, samples: &[A::Sample]) -> Vec<Bar> {
        let mut bars = Vec::new();
        let mut current: Option<Bar> = None;

        for sample in samples {
            if !self.aggregation.accepts(sample) {
                continue;
            }
            let bucket_ms =
                bucket_start(self.aggregation.timestamp(sample), self.width_secs) * 1000;

            if current
                .as_ref()
                .is_some_and(|bar| self.aggregation.closes(bucket_ms, bar))
            {
                bars.extend(current.take());
            }

            match current.as_mut() {
                Some(bar) => self.aggregation.fold(bar, sample),
                None => current = Some(self.aggregation.open_bar(sample, bucket_ms)),
            }
        }

        if let Some(bar) = current {
            bars.push(bar);
        }

        if let (Some(floor), [only]) = (self.price_floor, bars.as_mut_slice()) {
            only.open = only.open.min(floor);
            only.low = only.low.min(floor);
        }

        bars
    }

    /// Bars oldest-first, whatever the feed's native order.
    pub fn bucket_ascending(&self, samples: &[A::Sample]) -> Vec<Bar> {
        let mut bars = self.bucket(samples);
        if A::NEWEST_FIRST {
            bars.reverse();
        }
        bars
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn kline(t: i64, o: f64, h: f64, l: f64, c: f64) -> KlineRow {
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

    fn enriched(unix_time: i64, o: f64, h: f64, l: f64, c: f64, v_quote: f64) -> EnrichedRow {
        EnrichedRow {
            unix_time,
            o,
            h,
            l,
            c,
            v_quote,
        }
    }

    #[test]
    fn enriched_rows_in_one_bucket_fold_together() {
        let rows = vec![
            enriched(1000, 1.0, 2.0, 0.5, 1.5, 10.0),
            enriched(1030, 1.5, 1.8, 1.2, 1.6, 5.0),
        ];
        let bars = Bucketer::new(60, EnrichedAggregation::new(None)).bucket(&rows);

        assert_eq!(bars.len(), 1);
        let bar = bars[0];
        assert_eq!(bar.time, 960_000);
        assert_eq!(bar.open, 1.0);
        assert_eq!(bar.high, 2.0);
        assert_eq!(bar.low, 0.5);
        assert_eq!(bar.close, 1.6);
        assert_eq!(bar.volume, Some(15.0));
    }

    #[test]
    fn enriched_scale_multiplier_applies_to_prices_not_volume() {
        let rows = vec![enriched(0, 1.0, 2.0, 0.5, 1.5, 10.0)];
        let bars = Bucketer::new(60, EnrichedAggregation::new(Some(1000.0))).bucket(&rows);
        assert_eq!(bars[0].open, 1000.0);
        assert_eq!(bars[0].high, 2000.0);
        assert_eq!(bars[0].low, 500.0);
        assert_eq!(bars[0].close, 1500.0);
        assert_eq!(bars[0].volume, Some(10.0));
    }

    #[test]
    fn enriched_window_skips_rows_outside_range() {
        let rows = vec![
            enriched(50, 9.0, 9.0, 9.0, 9.0, 1.0),
            enriched(120, 1.0, 1.0, 1.0, 1.0, 1.0),
            enriched(300, 9.0, 9.0, 9.0, 9.0, 1.0),
        ];
        let bars =
            Bucketer::new(60, EnrichedAggregation::new(None).within(100, 300)).bucket(&rows);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].time, 120_000);
        assert_eq!(bars[0].close, 1.0);
    }

    #[test]
    fn enriched_late_row_within_bucket_width_folds_into_current() {
        let rows = vec![
            enriched(125, 1.0, 1.0, 1.0, 1.0, 1.0),
            enriched(110, 2.0, 3.0, 0.5, 2.0, 1.0),
        ];
        let bars = Bucketer::new(60, EnrichedAggregation::new(None)).bucket(&rows);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].time, 120_000);
        assert_eq!(bars[0].high, 3.0);
        assert_eq!(bars[0].low, 0.5);
    }

    #[test]
    fn kline_descending_rows_yield_one_bar_per_bucket() {
        let rows = vec![kline(120, 2.0, 2.5, 1.9, 2.2), kline(60, 1.0, 1.5, 0.9, 1.2)];
        let bucketer = Bucketer::new(60, KlineAggregation);
        let bars = bucketer.bucket(&rows);

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].time, 120_000);
        assert_eq!(bars[1].time, 60_000);
        assert!(bars.iter().all(|b| b.volume.is_none()));

        let ascending = bucketer.bucket_ascending(&rows);
        assert_eq!(ascending[0].time, 60_000);
        assert_eq!(ascending[1].time, 120_000);
    }

    #[test]
    fn kline_open_widens_over_all_prices() {
        let rows = vec![kline(0, 5.0, 4.0, 3.0, 6.0)];
        let bars = Bucketer::new(60, KlineAggregation).bucket(&rows);
        assert_eq!(bars[0].high, 6.0);
        assert_eq!(bars[0].low, 3.0);
        assert!(bars[0].is_well_formed());
    }

    #[test]
    fn kline_same_bucket_rows_fold_in_feed_order() {
        // Newest-first inside one 5m bucket.
        let rows = vec![
            kline(240, 1.4, 1.6, 1.3, 1.5),
            kline(120, 1.2, 1.3, 1.0, 1.25),
            kline(0, 1.0, 1.1, 0.9, 1.05),
        ];
        let bars = Bucketer::new(300, KlineAggregation).bucket(&rows);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].time, 0);
        assert_eq!(bars[0].open, 1.4);
        assert_eq!(bars[0].close, 1.05);
        assert_eq!(bars[0].high, 1.6);
        assert_eq!(bars[0].low, 0.9);
    }

    #[test]
    fn kline_interleaved_later_bucket_is_absorbed() {
        // Non-monotonic page: the 180 row belongs to a later bucket than the
        // accumulator and is folded in rather than splitting a bar off.
        let rows = vec![
            kline(120, 1.0, 1.0, 1.0, 1.0),
            kline(180, 2.0, 2.0, 2.0, 2.0),
            kline(60, 3.0, 3.0, 3.0, 3.0),
        ];
        let bars = Bucketer::new(60, KlineAggregation).bucket(&rows);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].time, 120_000);
        assert_eq!(bars[0].high, 2.0);
    }

    #[test]
    fn single_bar_is_clamped_to_price_floor() {
        let rows = vec![kline(60, 5.0, 6.0, 4.0, 5.5)];
        let bars = Bucketer::new(60, KlineAggregation)
            .with_price_floor(0.5)
            .bucket(&rows);
        assert_eq!(bars[0].open, 0.5);
        assert_eq!(bars[0].low, 0.5);
        assert_eq!(bars[0].close, 5.5);
        assert!(bars[0].is_well_formed());
    }

    #[test]
    fn price_floor_ignored_for_multiple_bars() {
        let rows = vec![kline(120, 5.0, 6.0, 4.0, 5.5), kline(60, 5.0, 6.0, 4.0, 5.5)];
        let bars = Bucketer::new(60, KlineAggregation)
            .with_price_floor(0.5)
            .bucket(&rows);
        assert!(bars.iter().all(|b| b.open == 5.0 && b.low == 4.0));
    }

    #[test]
    fn empty_page_yields_no_bars() {
        let bars = Bucketer::new(60, KlineAggregation).bucket(&[]);
        assert!(bars.is_empty());
    }

    #[test]
    fn ascending_enriched_bars_are_aligned_and_strictly_increasing() {
        for width in [60, 300, 900, 3600] {
            let rows: Vec<EnrichedRow> = (0..200)
                .map(|i| {
                    let p = 1.0 + (i % 7) as f64 * 0.1;
                    enriched(1_700_000_000 + i * 37, p, p + 0.2, p - 0.2, p + 0.05, 1.0)
                })
                .collect();
            let bucketer = Bucketer::new(width, EnrichedAggregation::new(None));
            let bars = bucketer.bucket(&rows);

            assert!(bars.iter().all(|b| b.time % (width * 1000) == 0));
            assert!(bars.windows(2).all(|w| w[0].time < w[1].time));
            assert!(bars.iter().all(Bar::is_well_formed));
            // Deterministic.
            assert_eq!(bars, bucketer.bucket(&rows));
        }
    }
}
