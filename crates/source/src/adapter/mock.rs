//! Scripted remote source for testing.

use super::RemoteSource;
use crate::error::{ErrorKind, Result};
use crate::models::{Enumeration, Listing, ResolvedItem};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// One scripted answer to an enumeration.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Listing(Listing),
    Throttled,
    /// Fails with [`Unavailable`](ErrorKind::Unavailable).
    Gone,
    /// Fails with [`Network`](ErrorKind::Network).
    NetworkError,
}

/// One scripted answer to an item resolution.
#[derive(Debug, Clone)]
pub enum MockResolution {
    Resolved(ResolvedItem),
    Gone,
    NetworkError,
}

/// Remote source whose answers are scripted per URL.
///
/// Each URL has a queue of responses; the last one repeats forever, so a
/// single scripted listing answers every call. URLs with no script fail
/// with [`Unsupported`](ErrorKind::Unsupported). Every call is recorded.
///
/// # Examples
///
/// ```
/// use vidsync_source::{Listing, MockResponse, MockSource, RemoteItem, RemoteSource};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let source = MockSource::new()
///     .with_response("https://example.com/c", MockResponse::Throttled)
///     .with_listing("https://example.com/c", Listing::new("favorites-1-C", vec![RemoteItem::new("u1", "One")]));
/// assert_eq!(source.enumerate("https://example.com/c").await.unwrap().item_count(), None);
/// assert_eq!(source.enumerate("https://example.com/c").await.unwrap().item_count(), Some(1));
/// assert_eq!(source.enumerations("https://example.com/c"), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MockSource {
    responses: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    resolutions: Mutex<HashMap<String, VecDeque<MockResolution>>>,
    calls: Mutex<Vec<String>>,
}

fn next<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    match queue.len() {
        0 => None,
        1 => queue.front().cloned(),
        _ => queue.pop_front(),
    }
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, url: impl Into<String>, response: MockResponse) -> Self {
        self.push_response(url, response);
        self
    }

    pub fn with_listing(self, url: impl Into<String>, listing: Listing) -> Self {
        self.with_response(url, MockResponse::Listing(listing))
    }

    pub fn with_resolution(self, item_url: impl Into<String>, resolution: MockResolution) -> Self {
        self.push_resolution(item_url, resolution);
        self
    }

    /// Queues another response for `url` on an already shared source.
    pub fn push_response(&self, url: impl Into<String>, response: MockResponse) {
        let mut guard = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        guard.entry(url.into()).or_default().push_back(response);
    }

    /// Replaces every queued response for `url`.
    pub fn set_response(&self, url: impl Into<String>, response: MockResponse) {
        let mut guard = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(url.into(), VecDeque::from([response]));
    }

    pub fn push_resolution(&self, item_url: impl Into<String>, resolution: MockResolution) {
        let mut guard = self.resolutions.lock().unwrap_or_else(|e| e.into_inner());
        guard.entry(item_url.into()).or_default().push_back(resolution);
    }

    /// Every call made so far, as `"enumerate <url>"` / `"resolve <url>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// How many times `url` was enumerated (fully or incrementally).
    pub fn enumerations(&self, url: &str) -> usize {
        let needle = format!("enumerate {url}");
        self.calls().iter().filter(|call| **call == needle).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

#[async_trait]
impl RemoteSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn enumerate(&self, url: &str) -> Result<Enumeration> {
        self.record(format!("enumerate {url}"));
        let response = {
            let mut guard = self.responses.lock().unwrap_or_else(|e| e.into_inner());
            guard.get_mut(url).and_then(next)
        };
        match response {
            Some(MockResponse::Listing(listing)) => Ok(Enumeration::Listed(listing)),
            Some(MockResponse::Throttled) => Ok(Enumeration::Throttled),
            Some(MockResponse::Gone) => exn::bail!(ErrorKind::Unavailable(url.to_string())),
            Some(MockResponse::NetworkError) => exn::bail!(ErrorKind::Network(url.to_string())),
            None => exn::bail!(ErrorKind::Unsupported(url.to_string())),
        }
    }

    async fn resolve_item(&self, item_url: &str) -> Result<ResolvedItem> {
        self.record(format!("resolve {item_url}"));
        let resolution = {
            let mut guard = self.resolutions.lock().unwrap_or_else(|e| e.into_inner());
            guard.get_mut(item_url).and_then(next)
        };
        match resolution {
            Some(MockResolution::Resolved(resolved)) => Ok(resolved),
            Some(MockResolution::Gone) => exn::bail!(ErrorKind::Unavailable(item_url.to_string())),
            Some(MockResolution::NetworkError) => exn::bail!(ErrorKind::Network(item_url.to_string())),
            None => Ok(ResolvedItem {
                title: item_url.to_string(),
                part_count: 1,
                ..Default::default()
            }),
        }
    }
}
