use crate::pool::{ProbeEntry, ProbePool};
use derive_more::Display;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use time::UtcDateTime;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use vidsync_source::{CollectionKind, Enumeration, RemoteSource};

#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThrottleState {
    #[default]
    #[display("normal")]
    Normal,
    /// An enumeration came back empty; probes will decide what it meant.
    #[display("suspected")]
    Suspected,
    /// Probes agree the platform is rate limiting us. Enumeration halts.
    #[display("throttled")]
    ConfirmedThrottled,
    /// Backing off and re-probing. Enumeration still halts.
    #[display("recovering")]
    Recovering,
}

/// Tunables for probing and recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePolicy {
    /// Maximum number of pooled known-good URLs.
    pub capacity: usize,
    /// A listing needs at least this many items to be pooled, and a probe
    /// needs at least this many to count as healthy.
    pub healthy_min_items: usize,
    /// Probes per confirmation or recovery round.
    pub max_probes: usize,
    /// First recovery delay; each further attempt doubles it.
    pub backoff_base: Duration,
    pub backoff_attempts: u32,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            capacity: 10,
            healthy_min_items: 5,
            max_probes: 3,
            backoff_base: Duration::from_secs(60),
            backoff_attempts: 5,
        }
    }
}

/// What an empty enumeration turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// A probe answered normally; the collection really is empty.
    Genuine,
    /// Every probe was degraded; the monitor is now throttled.
    Throttled,
    /// Nothing to probe against. No conclusion, no state change.
    Inconclusive,
}

/// How waiting for recovery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Recovered,
    /// Every backoff attempt still saw throttling.
    StillThrottled,
    Cancelled,
}

/// Point-in-time view of the monitor, for reporting.
#[derive(Debug, Clone)]
pub struct RiskStatus {
    pub state: ThrottleState,
    pub since: UtcDateTime,
    pub probes: Vec<ProbeEntry>,
}

#[derive(Debug)]
struct Inner {
    state: ThrottleState,
    since: UtcDateTime,
    pool: ProbePool,
}

/// Process-wide rate-limit state, shared (behind an `Arc`) by every
/// collection worker.
///
/// Transitions go through a plain mutex that is never held across an await.
/// Probe rounds are serialised by a separate async lock, so two workers that
/// both see an empty listing at the same time run a single confirmation, and
/// the second one reuses its conclusion.
pub struct RiskMonitor {
    policy: ProbePolicy,
    inner: Mutex<Inner>,
    probing: tokio::sync::Mutex<()>,
}

enum Probe {
    Healthy,
    Degraded,
}

impl RiskMonitor {
    pub fn new(policy: ProbePolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ThrottleState::Normal,
                since: UtcDateTime::now(),
                pool: ProbePool::new(policy.capacity),
            }),
            policy,
            probing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &ProbePolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State is a couple of plain values; a panic mid-update can't tear it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, to: ThrottleState) {
        let mut inner = self.lock();
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        inner.since = UtcDateTime::now();
        drop(inner);
        match to {
            ThrottleState::ConfirmedThrottled => tracing::warn!(%from, %to, "Rate limiting confirmed; enumeration paused"),
            ThrottleState::Normal if matches!(from, ThrottleState::Recovering) => {
                tracing::info!(%from, %to, "Rate limiting lifted")
            },
            _ => tracing::debug!(%from, %to, "Throttle state changed"),
        }
    }

    pub fn state(&self) -> ThrottleState {
        self.lock().state
    }

    /// Whether enumeration must halt for every collection.
    pub fn is_paused(&self) -> bool {
        matches!(self.state(), ThrottleState::ConfirmedThrottled | ThrottleState::Recovering)
    }

    pub fn status(&self) -> RiskStatus {
        let inner = self.lock();
        RiskStatus {
            state: inner.state,
            since: inner.since,
            probes: inner.pool.entries().cloned().collect(),
        }
    }

    /// Records a successful enumeration. Listings large enough to be
    /// meaningful become probe candidates.
    pub fn record_success(&self, url: &str, kind: Option<CollectionKind>, item_count: usize) {
        if item_count < self.policy.healthy_min_items {
            return;
        }
        if self.lock().pool.insert(url, kind) {
            tracing::debug!(url, item_count, "Added probe URL");
        }
    }

    pub fn clear_probes(&self) {
        self.lock().pool.clear();
        tracing::info!("Cleared probe URLs");
    }

    /// Forces the monitor back to normal.
    pub fn reset(&self) {
        self.transition(ThrottleState::Normal);
    }

    async fn probe(&self, source: &dyn RemoteSource, entry: &ProbeEntry) -> Probe {
        match source.enumerate(&entry.url).await {
            Ok(Enumeration::Listed(listing)) if listing.items.len() >= self.policy.healthy_min_items => {
                tracing::debug!(url = %entry.url, items = listing.items.len(), "Probe healthy");
                Probe::Healthy
            },
            Ok(Enumeration::Listed(listing)) => {
                tracing::debug!(url = %entry.url, items = listing.items.len(), "Probe came back short");
                Probe::Degraded
            },
            Ok(Enumeration::Throttled) => {
                tracing::debug!(url = %entry.url, "Probe throttled");
                Probe::Degraded
            },
            Err(err) => {
                tracing::debug!(url = %entry.url, error = ?err, "Probe failed");
                Probe::Degraded
            },
        }
    }

    /// Runs probes until one is healthy. `None` when the pool is empty.
    async fn probe_round(&self, source: &dyn RemoteSource) -> Option<bool> {
        let candidates = self.lock().pool.candidates(self.policy.max_probes);
        if candidates.is_empty() {
            return None;
        }
        for entry in &candidates {
            if let Probe::Healthy = self.probe(source, entry).await {
                return Some(true);
            }
        }
        Some(false)
    }

    /// Decides whether an empty (or throttle-flagged) enumeration means
    /// throttling, by probing known-good URLs.
    #[instrument(skip_all)]
    pub async fn confirm(&self, source: &dyn RemoteSource) -> Verdict {
        let _round = self.probing.lock().await;
        // Someone else's round may have concluded while we waited.
        if self.is_paused() {
            return Verdict::Throttled;
        }
        self.transition(ThrottleState::Suspected);
        match self.probe_round(source).await {
            Some(true) => {
                self.transition(ThrottleState::Normal);
                Verdict::Genuine
            },
            Some(false) => {
                self.transition(ThrottleState::ConfirmedThrottled);
                Verdict::Throttled
            },
            None => {
                tracing::warn!("No probe URLs available; cannot tell throttling from an empty collection");
                self.transition(ThrottleState::Normal);
                Verdict::Inconclusive
            },
        }
    }

    /// One recovery probe round. Returns `true` once enumeration may resume.
    #[instrument(skip_all)]
    pub async fn check_resolved(&self, source: &dyn RemoteSource) -> bool {
        let _round = self.probing.lock().await;
        if !self.is_paused() {
            return true;
        }
        self.transition(ThrottleState::Recovering);
        match self.probe_round(source).await {
            Some(true) => {
                self.transition(ThrottleState::Normal);
                true
            },
            Some(false) => {
                self.transition(ThrottleState::ConfirmedThrottled);
                false
            },
            None => {
                tracing::warn!("No probe URLs left; resuming without confirmation");
                self.transition(ThrottleState::Normal);
                true
            },
        }
    }

    /// Re-probes with exponential backoff (base, 2×base, 4×base, ...) until
    /// throttling lifts, the attempts run out, or `cancel` fires.
    pub async fn await_recovery(&self, source: &dyn RemoteSource, cancel: &CancellationToken) -> Recovery {
        if !self.is_paused() {
            return Recovery::Recovered;
        }
        for attempt in 0..self.policy.backoff_attempts {
            let delay = self.policy.backoff_base.saturating_mul(2u32.saturating_pow(attempt));
            tracing::info!(attempt = attempt + 1, delay_secs = delay.as_secs(), "Waiting before re-probing");
            tokio::select! {
                _ = cancel.cancelled() => return Recovery::Cancelled,
                _ = tokio::time::sleep(delay) => {},
            }
            if self.check_resolved(source).await {
                return Recovery::Recovered;
            }
        }
        tracing::warn!(attempts = self.policy.backoff_attempts, "Still throttled after every backoff attempt");
        Recovery::StillThrottled
    }
}

impl Default for RiskMonitor {
    fn default() -> Self {
        Self::new(ProbePolicy::default())
    }
}
