//! Transfer Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! A downloader that ran and failed is *not* an error here: that is an
//! [`Outcome`](crate::Outcome). Errors are for when it couldn't run at all,
//! or was stopped.

use derive_more::{Display, Error};

/// A transfer error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("downloader not detected on your system: {_0}")]
    ToolNotFound(#[error(not(source))] String),
    /// Spawning, reading from or waiting on the downloader failed.
    #[display("downloader I/O error")]
    Io,
    /// Stopped on request; the process has been terminated.
    #[display("transfer cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io)
    }
}
