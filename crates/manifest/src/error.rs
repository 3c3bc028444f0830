//! Manifest Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A manifest error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for manifest operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Reading, writing or renaming a snapshot failed.
    #[display("manifest I/O error")]
    Io,
    /// Snapshot bytes are not valid in any supported text encoding.
    #[display("manifest is not valid UTF-8, GBK or GB18030 text")]
    Encoding,
    /// Snapshot is structurally unusable (missing a required column, broken CSV).
    #[display("malformed manifest: {_0}")]
    Malformed(#[error(not(source))] String),
    /// The collection directory has no snapshot at all.
    #[display("no manifest found in {}", _0.display())]
    NoManifest(#[error(not(source))] PathBuf),
    /// No record in the manifest carries this item URL.
    #[display("item not found in manifest: {_0}")]
    ItemNotFound(#[error(not(source))] String),
    /// Path contains invalid characters or escapes the collection directory.
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io)
    }

    /// Returns `true` if the snapshot on disk can never be loaded as-is.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Encoding | Self::Malformed(_))
    }
}
