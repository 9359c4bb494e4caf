use std::collections::HashMap;

use crate::types::Bar;

// ---------------------------------------------------------------------------
// LastBarCache
// ---------------------------------------------------------------------------

/// Most recent historical bar per symbol, used only to seed live continuity.
///
/// One entry per symbol; a new historical session overwrites the entry and
/// entries are never merged across symbols.
#[derive(Debug, Default, Clone)]
pub struct LastBarCache {
    bars: HashMap<String, Bar>,
}

impl LastBarCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&mut self, symbol: &str, bar: Bar) {
        self.bars.insert(symbol.to_string(), bar);
    }

    /// Point-in-time copy of the cached bar.
    pub fn get(&self, symbol: &str) -> Option<Bar> {
        self.bars.get(symbol).copied()
    }
}

// ---------------------------------------------------------------------------
// PaginationCursor
// ---------------------------------------------------------------------------

/// Position of one symbol's historical backfill.
///
/// Before the first page there is no cursor and the next request starts at
/// the newest history. After a page, a missing cursor means history is
/// exhausted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PaginationCursor {
    next: Option<String>,
    pages: u32,
}

impl PaginationCursor {
    /// Begin a fresh historical session.
    pub fn reset(&mut self) {
        self.next = None;
        self.pages = 0;
    }

    /// Record the cursor returned with a page.
    pub fn advance(&mut self, next: Option<String>) {
        self.next = next;
        self.pages += 1;
    }

    /// Cursor to send with the next request.
    pub fn next_key(&self) -> Option<&str> {
        self.next.as_deref()
    }

    /// At least one page was fetched and the upstream returned no cursor.
    pub fn is_exhausted(&self) -> bool {
        self.pages > 0 && self.next.is_none()
    }

    pub fn pages(&self) -> u32 {
        self.pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(time: i64, close: f64) -> Bar {
        Bar {
            time,
            open: close,
            high: close,
            low: close,
            close,
            volume: None,
        }
    }

    #[test]
    fn cache_overwrites_per_symbol() {
        let mut cache = LastBarCache::new();
        cache.seed("A", bar(60_000, 1.0));
        cache.seed("B", bar(60_000, 2.0));
        cache.seed("A", bar(120_000, 3.0));

        assert_eq!(cache.get("A").map(|b| b.close), Some(3.0));
        assert_eq!(cache.get("B").map(|b| b.close), Some(2.0));
        assert_eq!(cache.get("C"), None);
    }

    #[test]
    fn fresh_cursor_is_not_exhausted() {
        let cursor = PaginationCursor::default();
        assert!(!cursor.is_exhausted());
        assert_eq!(cursor.next_key(), None);
    }

    #[test]
    fn cursor_exhausts_after_page_without_key() {
        let mut cursor = PaginationCursor::default();
        cursor.advance(Some("k1".into()));
        assert_eq!(cursor.next_key(), Some("k1"));
        assert!(!cursor.is_exhausted());

        cursor.advance(None);
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.pages(), 2);

        cursor.reset();
        assert!(!cursor.is_exhausted());
    }
}
