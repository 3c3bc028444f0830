use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use vidsync_manifest::Stats;

/// Download progress of the collection currently being worked on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub total: usize,
    pub downloaded: usize,
    pub pending: usize,
    pub percent: u8,
}

impl From<Stats> for Progress {
    fn from(stats: Stats) -> Self {
        Self {
            total: stats.total,
            downloaded: stats.downloaded,
            pending: stats.pending,
            percent: stats.percent(),
        }
    }
}

/// Stop switch and progress feed shared between a running task and whoever
/// started it. Clones share state.
#[derive(Debug, Clone)]
pub struct TaskControl {
    cancel: CancellationToken,
    progress: Arc<watch::Sender<Progress>>,
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskControl {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Uses an existing token, e.g. a child of a process-wide one.
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            progress: Arc::new(watch::Sender::new(Progress::default())),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn progress(&self) -> Progress {
        *self.progress.borrow()
    }

    /// Receiver that is notified on every progress change.
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    pub(crate) fn report(&self, stats: Stats) {
        let progress = Progress::from(stats);
        self.progress.send_if_modified(|current| {
            let changed = *current != progress;
            *current = progress;
            changed
        });
        tracing::debug!(
            downloaded = progress.downloaded,
            total = progress.total,
            percent = progress.percent,
            "Progress updated"
        );
    }

    /// Sleeps for `duration` unless cancelled first. Returns `false` when
    /// cancelled.
    pub(crate) async fn pause(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
