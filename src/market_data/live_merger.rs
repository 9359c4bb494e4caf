// =============================================================================
// Live Bar Merger — folds real-time bar updates into the in-progress bar
// =============================================================================
//
// An update for the open bucket mutates the live bar in place. An update for a
// newer bucket freezes the live bar and starts a new one. Updates for an older
// bucket are stale and are dropped without touching state, so the start times
// a subscriber sees never go backwards.
// =============================================================================

use tracing::debug;

use crate::live::LiveEvent;
use crate::resolution::{bucket_start, Resolution};
use crate::types::Bar;

/// What a single live event did to the current bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MergeOutcome {
    /// The event belonged to the open bucket; carries the mutated bar.
    Updated(Bar),
    /// The event started a newer bucket; carries the new bar.
    Opened(Bar),
    /// The event belonged to an older bucket and was ignored.
    Stale,
}

impl MergeOutcome {
    pub fn bar(&self) -> Option<Bar> {
        match self {
            Self::Updated(bar) | Self::Opened(bar) => Some(*bar),
            Self::Stale => None,
        }
    }
}

/// Decide how `event` changes `current` at `resolution`. Pure.
pub fn merge_live_event(event: &LiveEvent, resolution: Resolution, current: Option<&Bar>) -> MergeOutcome {
    let bucket_ms = bucket_start(event.time, resolution.bucket_seconds()) * 1000;

    match current {
        Some(bar) if bucket_ms == bar.time => MergeOutcome::Updated(Bar {
            close: event.close,
            high: bar.high.max(event.high),
            low: bar.low.min(event.low),
            ..*bar
        }),
        Some(bar) if bucket_ms < bar.time => MergeOutcome::Stale,
        _ => MergeOutcome::Opened(Bar {
            time: bucket_ms,
            open: event.open,
            high: event.high,
            low: event.low,
            close: event.close,
            volume: None,
        }),
    }
}

/// Holds the single "current bar" of one subscription.
#[derive(Debug, Clone)]
pub struct LiveBarMerger {
    resolution: Resolution,
    current: Option<Bar>,
}

impl LiveBarMerger {
    /// Start a merger, optionally continuing from the last historical bar.
    pub fn new(resolution: Resolution, seed: Option<Bar>) -> Self {
        Self {
            resolution,
            current: seed,
        }
    }

    #[cfg(test)]
    pub fn current(&self) -> Option<&Bar> {
        self.current.as_ref()
    }

    /// Apply one event; returns the bar to publish, or `None` if it was stale.
    pub fn on_event(&mut self, event: &LiveEvent) -> Option<Bar> {
        let outcome = merge_live_event(event, self.resolution, self.current.as_ref());
        match outcome.bar() {
            Some(bar) => {
                self.current = Some(bar);
                Some(bar)
            }
            None => {
                debug!(
                    pool_id = %event.pool_id,
                    event_time = event.time,
                    current = ?self.current.map(|b| b.time),
                    "dropping stale live event"
                );
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
