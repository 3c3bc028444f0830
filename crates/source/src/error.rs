//! Source Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A source error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for source operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The collection or item is gone (deleted, private, access denied).
    /// Asking again will not help.
    #[display("remote content unavailable: {_0}")]
    Unavailable(#[error(not(source))] String),
    /// Transport-level failure; worth another try later.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The remote answered with something that could not be understood.
    #[display("malformed response: {_0}")]
    Malformed(#[error(not(source))] String),
    /// No adapter knows what to do with this URL.
    #[display("unsupported URL: {_0}")]
    Unsupported(#[error(not(source))] String),
    /// The lister program could not be found or started.
    #[display("lister program unavailable: {_0}")]
    ToolNotFound(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Returns `true` if the failure says something permanent about the
    /// remote content itself.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Unsupported(_))
    }
}
