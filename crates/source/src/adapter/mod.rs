//! Remote source adapter trait and implementations.
//!
//! The engine never talks to a platform directly. It asks a [`RemoteSource`]
//! for a collection's items, optionally stopping early at items it already
//! knows, and for the full metadata of placeholder items.

mod command;
#[cfg(feature = "mock")]
mod mock;

pub use self::command::CommandSource;
#[cfg(feature = "mock")]
pub use self::mock::{MockResolution, MockResponse, MockSource};
use crate::error::Result;
use crate::models::{Enumeration, ResolvedItem};
use async_trait::async_trait;
use std::collections::HashSet;

/// Unified interface for enumerating remote collections.
///
/// # Errors
/// Implementations report collections that are gone for good (deleted,
/// private, access denied) as [`Unavailable`](crate::error::ErrorKind::Unavailable)
/// and everything transient as [`Network`](crate::error::ErrorKind::Network).
/// Rate limiting is *not* an error: it is [`Enumeration::Throttled`].
///
/// # Examples
///
/// ```
/// use vidsync_source::{RemoteSource, error::Result};
///
/// async fn count(source: &dyn RemoteSource, url: &str) -> Result<Option<usize>> {
///     Ok(source.enumerate(url).await?.item_count())
/// }
/// ```
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Adapter name, for logging only.
    fn name(&self) -> &str;

    /// Lists every item of the collection at `url`, in remote order.
    async fn enumerate(&self, url: &str) -> Result<Enumeration>;

    /// Lists only the items newer than anything in `known`.
    ///
    /// Default implementation enumerates everything and truncates at the
    /// first known URL. Adapters that page through results should stop
    /// paging instead.
    async fn enumerate_incremental(&self, url: &str, known: &HashSet<String>) -> Result<Enumeration> {
        Ok(self.enumerate(url).await?.take_until_known(known))
    }

    /// Fetches full metadata for one placeholder item.
    async fn resolve_item(&self, item_url: &str) -> Result<ResolvedItem>;
}
