//! Rate-limit ("risk control") detection.
//!
//! Platforms that rate limit tend to do it quietly: listings come back
//! empty instead of failing. An empty listing alone can't tell a throttled
//! client from a collection that really was emptied, so the [`RiskMonitor`]
//! keeps a small pool of collection URLs that recently listed plenty of
//! items and probes those before drawing a conclusion.
//!
//! ```text
//!  Normal ──empty listing──▶ Suspected ──all probes degraded──▶ ConfirmedThrottled
//!    ▲                          │                                    │
//!    └──────any probe healthy───┘            backoff, re-probe       ▼
//!    ▲                                                          Recovering
//!    └───────────────────────healthy probe──────────────────────────┘
//! ```

mod monitor;
mod pool;

pub use crate::monitor::{ProbePolicy, Recovery, RiskMonitor, RiskStatus, ThrottleState, Verdict};
pub use crate::pool::{ProbeEntry, ProbePool};
