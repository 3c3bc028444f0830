//! Media transfer through an external downloader.
//!
//! The downloader does the byte-level work; this crate builds its command
//! line, relays its output into the log, and turns a finished run into an
//! [`Outcome`] the orchestrator can act on.

mod classify;
mod downloader;
pub mod error;
#[cfg(feature = "mock")]
mod mock;
mod request;

pub use crate::classify::{Classification, FailureKind, Outcome, classify};
pub use crate::downloader::{Downloader, TransferReport};
#[cfg(feature = "mock")]
pub use crate::mock::{MockStep, MockTransfer};
pub use crate::request::TransferRequest;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs one transfer to completion.
///
/// # Errors
/// Returns [`Cancelled`](error::ErrorKind::Cancelled) once `cancel` fires
/// (the in-flight process has been stopped by then), and an error when the
/// tool could not be run at all. A run that completed, successfully or not,
/// is always `Ok` with its [`Outcome`] in the report.
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn run(&self, request: &TransferRequest, cancel: &CancellationToken) -> Result<TransferReport>;
}

pub type TransferHandle = Arc<dyn Transfer>;
