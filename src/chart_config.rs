// =============================================================================
// Chart Preferences — per-chart resolution + theme with atomic autosave
// =============================================================================
//
// Each chart kind (kline pool chart, enriched chart) remembers the resolution
// and theme the user last picked. An active chart session pushes its current
// preferences into the store once per autosave period; the store only touches
// disk when something actually changed.
//
// Persistence uses the same tmp + rename pattern as the runtime config.
// =============================================================================

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{FeedVariant, Theme};

/// Preferences shared between a chart session and its autosave task.
pub type SharedPreferences = Arc<Mutex<ChartPreferences>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartPreferences {
    /// Last selected resolution label; `None` until the user picks one.
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub theme: Theme,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ChartConfigFile {
    #[serde(default)]
    kline: ChartPreferences,
    #[serde(default)]
    enriched: ChartPreferences,
}

impl ChartConfigFile {
    fn slot(&mut self, kind: FeedVariant) -> &mut ChartPreferences {
        match kind {
            FeedVariant::Kline => &mut self.kline,
            FeedVariant::Enriched => &mut self.enriched,
        }
    }
}

/// Resolution shown when nothing has been saved for `kind`.
pub fn default_resolution(kind: FeedVariant) -> &'static str {
    match kind {
        FeedVariant::Enriched => "15",
        FeedVariant::Kline => "5",
    }
}

#[derive(Debug)]
pub struct ChartConfigStore {
    path: PathBuf,
    state: Mutex<ChartConfigFile>,
    dirty: AtomicBool,
}

impl ChartConfigStore {
    /// Load from `path`. A missing or unreadable file starts from defaults.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let state = match Self::read(&path) {
            Ok(file) => {
                info!(path = %path.display(), "chart preferences loaded");
                file
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "chart preferences unavailable, using defaults");
                ChartConfigFile::default()
            }
        };

        Self {
            path,
            state: Mutex::new(state),
            dirty: AtomicBool::new(false),
        }
    }

    fn read(path: &Path) -> Result<ChartConfigFile> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read chart preferences from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse chart preferences from {}", path.display()))
    }

    pub fn preferences(&self, kind: FeedVariant) -> ChartPreferences {
        self.state.lock().slot(kind).clone()
    }

    /// Saved resolution for `kind`, or its default.
    pub fn initial_resolution(&self, kind: FeedVariant) -> String {
        self.preferences(kind)
            .resolution
            .unwrap_or_else(|| default_resolution(kind).to_string())
    }

    /// Replace the preferences of `kind`. Returns `true` if they changed.
    pub fn update(&self, kind: FeedVariant, prefs: ChartPreferences) -> bool {
        let mut state = self.state.lock();
        let slot = state.slot(kind);
        if *slot == prefs {
            return false;
        }
        *slot = prefs;
        self.dirty.store(true, Ordering::SeqCst);
        true
    }

    /// Write to disk if anything changed since the last save.
    pub fn save_if_dirty(&self) -> Result<bool> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        if let Err(e) = self.save() {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }
        Ok(true)
    }

    /// Atomic write: temporary sibling file, then rename.
    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&*self.state.lock())
            .context("failed to serialise chart preferences to JSON")?;

        let tmp_path = self.path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp preferences to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to rename tmp preferences to {}", self.path.display()))?;

        debug!(path = %self.path.display(), "chart preferences saved");
        Ok(())
    }
}

/// One autosave tick: push the session's current preferences and flush.
pub fn autosave_tick(store: &ChartConfigStore, kind: FeedVariant, prefs: &SharedPreferences) {
    let current = prefs.lock().clone();
    if store.update(kind, current) {
        if let Err(e) = store.save_if_dirty() {
            warn!(chart = %kind, error = %e, "chart preferences autosave failed");
        }
    }
}
