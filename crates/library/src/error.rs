//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Failures from the manifest, source
//! and transfer crates are raised into one of the dependency kinds below, so
//! the original error stays reachable in the tree.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Reading or writing a collection's manifest failed.
    #[display("manifest operation failed")]
    Manifest,
    /// The remote source failed in a way that may clear up on its own.
    #[display("remote source failed")]
    Source,
    /// The downloader could not be run at all.
    #[display("transfer tool failed")]
    Transfer,
    #[display("filesystem error")]
    Io,
    /// The downloader rejected the credentials or account state. Every
    /// further transfer would fail the same way.
    #[display("downloader configuration problem: {_0}")]
    Configuration(#[error(not(source))] String),
    #[display("not a collection directory: {}", _0.display())]
    InvalidCollection(#[error(not(source))] PathBuf),
    #[display("stopped on request")]
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Source | Self::Io)
    }

    /// Returns `true` if the error should stop a whole batch rather than
    /// just the collection it happened in.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Cancelled | Self::Transfer)
    }
}
