//! The synchronization engine.
//!
//! One update cycle for a collection directory is strictly ordered:
//! [`reconcile`] compares the remote listing with the manifest (merging new
//! items, or disabling/pausing), then [`fetch_pending`] drains whatever is
//! still pending. [`update_all`] runs that cycle for every collection under
//! an output root, one at a time; [`sync_url`] starts a new collection.

pub mod collection;
mod control;
pub mod error;
mod fetch;
mod reconcile;
mod size;
#[cfg(test)]
mod testing;
mod update;

pub use crate::collection::{DisableReason, Disabled};
pub use crate::control::{Progress, TaskControl};
pub use crate::fetch::{FetchSummary, fetch_pending};
pub use crate::reconcile::{ReconcileOutcome, reconcile};
pub use crate::size::{folder_size, format_size};
pub use crate::update::{UpdateEvent, UpdateOutcome, sync_url, update_all, update_one};
use std::sync::Arc;
use std::time::Duration;
use vidsync_risk::RiskMonitor;
use vidsync_source::SourceHandle;
use vidsync_transfer::TransferHandle;

/// Knobs for transfers and pacing.
#[derive(Debug, Clone)]
pub struct Settings {
    pub credential: Option<String>,
    /// Extra downloader flags, appended after the generated ones.
    pub extra_args: Vec<String>,
    pub max_attempts: u32,
    pub retry_step: Duration,
    pub retry_cap: Duration,
    /// Pause between two items.
    pub item_cooldown: Duration,
    /// Pause after an item that was left pending.
    pub failure_cooldown: Duration,
    /// Wait before re-measuring an output folder that came up empty.
    pub size_recheck: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            credential: None,
            extra_args: Vec::new(),
            max_attempts: 5,
            retry_step: Duration::from_secs(2),
            retry_cap: Duration::from_secs(10),
            item_cooldown: Duration::from_secs(2),
            failure_cooldown: Duration::from_secs(1),
            size_recheck: Duration::from_secs(2),
        }
    }
}

impl Settings {
    /// Delay before the `retry`-th retry (1-based).
    pub fn retry_delay(&self, retry: u32) -> Duration {
        self.retry_step.saturating_mul(retry).min(self.retry_cap)
    }
}

/// Everything an update cycle talks to.
///
/// The risk monitor is shared process-wide: once one collection confirms
/// throttling, every other collection sees the pause.
#[derive(Clone)]
pub struct Context {
    pub source: SourceHandle,
    pub transfer: TransferHandle,
    pub risk: Arc<RiskMonitor>,
    pub settings: Settings,
}

impl Context {
    pub fn new(source: SourceHandle, transfer: TransferHandle, risk: Arc<RiskMonitor>) -> Self {
        Self {
            source,
            transfer,
            risk,
            settings: Settings::default(),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }
}
