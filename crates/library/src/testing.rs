//! Fixtures shared by the engine's tests.

use crate::{Context, Settings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vidsync_manifest::{ManifestItem, ManifestStore};
use vidsync_risk::{RiskMonitor, Verdict};
use vidsync_source::{Listing, MockResponse, MockSource, RemoteItem};
use vidsync_transfer::MockTransfer;

const THROTTLED_PROBE: &str = "https://example.com/probe/throttled";

/// An output root plus a context wired to scripted doubles.
pub(crate) struct Harness {
    root: TempDir,
    pub source: Arc<MockSource>,
    pub transfer: Arc<MockTransfer>,
    pub ctx: Context,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_transfer(MockTransfer::new())
    }

    pub fn with_transfer(transfer: MockTransfer) -> Self {
        let source = Arc::new(MockSource::new());
        let transfer = Arc::new(transfer);
        let ctx = Context::new(source.clone(), transfer.clone(), Arc::new(RiskMonitor::default())).with_settings(Settings {
            item_cooldown: Duration::ZERO,
            failure_cooldown: Duration::ZERO,
            size_recheck: Duration::ZERO,
            ..Settings::default()
        });
        Self {
            root: tempfile::tempdir().unwrap(),
            source,
            transfer,
            ctx,
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Pools `url` as a probe that answers with `items` entries.
    pub fn add_probe(&self, url: &str, items: usize) {
        let urls: Vec<String> = (0..items).map(|i| format!("{url}/v/{i}")).collect();
        let urls: Vec<&str> = urls.iter().map(String::as_str).collect();
        self.source.set_response(url, MockResponse::Listing(listing("favorites-0-Probe", &urls)));
        self.ctx.risk.record_success(url, None, items);
    }

    /// Drives the shared monitor into the throttled state.
    pub async fn throttle(&self) {
        self.ctx.risk.clear_probes();
        self.ctx.risk.record_success(THROTTLED_PROBE, None, 10);
        self.source.set_response(THROTTLED_PROBE, MockResponse::Throttled);
        assert_eq!(self.ctx.risk.confirm(self.source.as_ref()).await, Verdict::Throttled);
    }

    /// Makes the throttling probe healthy again.
    pub fn lift_throttle(&self) {
        let urls: Vec<String> = (0..10).map(|i| format!("{THROTTLED_PROBE}/v/{i}")).collect();
        let urls: Vec<&str> = urls.iter().map(String::as_str).collect();
        self.source.set_response(THROTTLED_PROBE, MockResponse::Listing(listing("favorites-0-Probe", &urls)));
    }
}

pub(crate) fn favorites_url() -> String {
    "https://space.bilibili.com/9/favlist?fid=2".to_string()
}

/// A manifest record whose URL, title and path are all `url`.
pub(crate) fn item(url: &str, downloaded: bool) -> ManifestItem {
    let mut item = ManifestItem::new(url, url, url);
    item.downloaded = downloaded;
    item
}

/// A listing of plain items whose URL doubles as their title.
pub(crate) fn listing(title: &str, urls: &[&str]) -> Listing {
    Listing::new(title, urls.iter().map(|url| RemoteItem::new(*url, *url)).collect())
}

/// Creates `<root>/<name>` with a first manifest snapshot.
pub(crate) fn seed(root: &Path, name: &str, origin_url: &str, items: &[ManifestItem]) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    ManifestStore::new(&dir).save(items, origin_url).unwrap();
    dir
}
