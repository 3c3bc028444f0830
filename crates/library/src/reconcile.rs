use crate::Context;
use crate::collection::{self, DisableReason, Disabled};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::instrument;
use vidsync_manifest::path::sanitize_component;
use vidsync_manifest::{ManifestItem, ManifestStore, Status, validate_path};
use vidsync_risk::Verdict;
use vidsync_source::error::ErrorKind as SourceErrorKind;
use vidsync_source::{Enumeration, ItemState, RemoteItem};

/// Result of reconciling one collection directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The directory was renamed out of rotation.
    Disabled(Disabled),
    /// Rate limiting is in effect; nothing was changed.
    Paused,
    /// The remote gave an answer that can't be trusted either way (an empty
    /// or throttle-flagged listing with no probe URLs to compare against).
    /// The collection is left as it is until the next cycle.
    Untouched,
    /// The manifest is up to date; these items still need fetching.
    Pending(Vec<ManifestItem>),
}

/// Brings the manifest in `dir` up to date with the remote collection.
///
/// # Errors
/// Transient enumeration failures surface as [`Source`](ErrorKind::Source)
/// and leave the directory untouched. Everything the remote says about the
/// collection being permanently unusable is an
/// [`Disabled`](ReconcileOutcome::Disabled) outcome instead.
#[instrument(skip_all, fields(dir = %collection::dir_name(dir)))]
pub async fn reconcile(ctx: &Context, dir: &Path) -> Result<ReconcileOutcome> {
    let store = ManifestStore::new(dir);
    let manifest = match store.load() {
        Ok(Some(manifest)) => manifest,
        Ok(None) => return disable(dir, DisableReason::NoManifest),
        Err(err) if err.is_corrupt() => {
            tracing::warn!(error = ?err, "Manifest can't be read");
            return disable(dir, DisableReason::Corrupt);
        },
        Err(err) => return Err(err).or_raise(|| ErrorKind::Manifest),
    };
    let Some(origin_url) = manifest.origin_url.clone().filter(|url| !url.trim().is_empty()) else {
        return disable(dir, DisableReason::NoUrl);
    };

    if ctx.risk.is_paused() {
        tracing::info!("Rate limiting in effect; not enumerating");
        return Ok(ReconcileOutcome::Paused);
    }

    let kind = collection::kind_of(dir);
    let known = manifest.urls();
    // Stopping at the first known item only works for collections listed
    // newest-first.
    let incremental = !known.is_empty() && kind.is_some_and(|kind| kind.supports_incremental());
    tracing::info!(url = %origin_url, incremental, "Enumerating collection");
    let enumeration = match incremental {
        true => ctx.source.enumerate_incremental(&origin_url, &known).await,
        false => ctx.source.enumerate(&origin_url).await,
    };
    let listing = match enumeration {
        Ok(Enumeration::Listed(listing)) => listing,
        Ok(Enumeration::Throttled) => {
            tracing::warn!("Source reported rate limiting");
            return match ctx.risk.confirm(ctx.source.as_ref()).await {
                Verdict::Throttled => Ok(ReconcileOutcome::Paused),
                Verdict::Genuine | Verdict::Inconclusive => Ok(ReconcileOutcome::Untouched),
            };
        },
        Err(err) if matches!(&*err, SourceErrorKind::Unavailable(_)) => {
            tracing::warn!(error = ?err, "Remote collection is gone");
            return disable(dir, DisableReason::Gone);
        },
        Err(err) => return Err(err).or_raise(|| ErrorKind::Source),
    };

    // Directories are named after the sanitized title, so compare in that form.
    if let Some(expected) = sanitize_component(&listing.title)
        && expected != collection::dir_name(dir)
    {
        tracing::warn!(remote = %listing.title, "Remote title no longer matches the directory");
        return disable(dir, DisableReason::Renamed);
    }
    if listing.items.is_empty() && !incremental {
        tracing::warn!("Remote listing is empty; checking for rate limiting");
        return match ctx.risk.confirm(ctx.source.as_ref()).await {
            Verdict::Throttled => Ok(ReconcileOutcome::Paused),
            Verdict::Genuine => disable(dir, DisableReason::Empty),
            Verdict::Inconclusive => Ok(ReconcileOutcome::Untouched),
        };
    }

    ctx.risk.record_success(&origin_url, kind, listing.items.len());
    let new_urls = new_urls(&listing.items, &known);
    if new_urls.is_empty() {
        tracing::info!(listed = listing.items.len(), "No new items");
    } else {
        tracing::info!(new = new_urls.len(), listed = listing.items.len(), "Found new items");
        let incoming = listing.items.iter().map(to_manifest_item).collect();
        store.merge(incoming, &origin_url).or_raise(|| ErrorKind::Manifest)?;
    }
    let pending = store.pending_items().or_raise(|| ErrorKind::Manifest)?;
    tracing::info!(pending = pending.len(), "Reconciled");
    Ok(ReconcileOutcome::Pending(pending))
}

fn disable(dir: &Path, reason: DisableReason) -> Result<ReconcileOutcome> {
    collection::disable(dir, reason).map(ReconcileOutcome::Disabled)
}

/// Listed URLs the manifest doesn't know yet, in listing order.
fn new_urls<'a>(items: &'a [RemoteItem], known: &HashSet<String>) -> Vec<&'a str> {
    items.iter().map(|item| item.url.as_str()).filter(|url| !known.contains(*url)).collect()
}

/// Manifest record for a freshly listed item.
pub(crate) fn to_manifest_item(item: &RemoteItem) -> ManifestItem {
    let status = match item.state {
        ItemState::Ready => Status::Normal,
        ItemState::Placeholder => Status::Pending,
        ItemState::Unavailable => Status::Unavailable,
    };
    let mut record = ManifestItem::new(&item.url, &item.title, download_path(item))
        .with_status(status)
        .with_parts(item.part_count);
    record.name = item.name.clone();
    record.container_id = item.container_id.clone();
    record.content_id = item.content_id.clone();
    record.pubdate = item.pubdate;
    record
}

/// The listed path if it stays inside the collection, else one derived
/// from the title or ids.
fn download_path(item: &RemoteItem) -> PathBuf {
    if let Ok(path) = validate_path(&item.path) {
        return path;
    }
    let fallback = [item.title.as_str(), item.container_id.as_str(), item.url.as_str()]
        .into_iter()
        .find_map(sanitize_component)
        .unwrap_or_else(|| "untitled".to_string());
    tracing::debug!(path = %item.path.display(), fallback = %fallback, "Replacing unusable download path");
    PathBuf::from(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::TaskControl;
    use crate::testing::{Harness, favorites_url, item, listing, seed};
    use vidsync_manifest::Stats;
    use vidsync_risk::ThrottleState;
    use vidsync_source::{Listing, MockResponse};
    use vidsync_transfer::{MockStep, MockTransfer};

    #[tokio::test]
    async fn test_new_items_are_merged_and_pending() {
        let harness = Harness::new();
        let dir = seed(harness.root(), "series-7-Lectures", "https://example.com/series/7", &[item("A", true)]);
        harness.source.set_response(
            "https://example.com/series/7",
            MockResponse::Listing(listing("series-7-Lectures", &["A", "B"])),
        );

        let outcome = reconcile(&harness.ctx, &dir).await.unwrap();
        let ReconcileOutcome::Pending(pending) = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(pending.iter().map(|item| item.item_url.as_str()).collect::<Vec<_>>(), ["B"]);
        let manifest = ManifestStore::new(&dir).load().unwrap().unwrap();
        assert_eq!(manifest.items.len(), 2);
        assert!(manifest.get("A").unwrap().downloaded);
        assert_eq!(harness.source.calls(), ["enumerate https://example.com/series/7"]);
    }

    #[tokio::test]
    async fn test_nothing_new_still_returns_pending() {
        let harness = Harness::new();
        let dir = seed(
            harness.root(),
            "series-7-Lectures",
            "https://example.com/series/7",
            &[item("A", true), item("B", false)],
        );
        let before = ManifestStore::new(&dir).latest().unwrap();
        harness.source.set_response(
            "https://example.com/series/7",
            MockResponse::Listing(listing("series-7-Lectures", &["A", "B"])),
        );
        let outcome = reconcile(&harness.ctx, &dir).await.unwrap();
        assert!(matches!(&outcome, ReconcileOutcome::Pending(items) if items.len() == 1));
        assert_eq!(ManifestStore::new(&dir).latest().unwrap(), before);
    }

    #[tokio::test]
    async fn test_incremental_for_newest_first_collections() {
        let harness = Harness::new();
        let url = favorites_url();
        let dir = seed(harness.root(), "favorites-2-Music", &url, &[item("A", true), item("B", true)]);
        harness.source.set_response(&url, MockResponse::Listing(listing("favorites-2-Music", &["C", "B", "A"])));

        let outcome = reconcile(&harness.ctx, &dir).await.unwrap();
        let ReconcileOutcome::Pending(pending) = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].item_url, "C");
        assert_eq!(ManifestStore::new(&dir).stats().unwrap().total, 3);
    }

    #[tokio::test]
    async fn test_incremental_empty_means_nothing_new() {
        let harness = Harness::new();
        let url = favorites_url();
        let dir = seed(harness.root(), "favorites-2-Music", &url, &[item("A", true)]);
        harness.source.set_response(&url, MockResponse::Listing(listing("favorites-2-Music", &["A"])));
        let outcome = reconcile(&harness.ctx, &dir).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Pending(vec![]));
        assert!(dir.exists());
    }

    #[tokio::test]
    async fn test_missing_manifest_disables() {
        let harness = Harness::new();
        let dir = harness.root().join("favorites-3-Empty");
        std::fs::create_dir(&dir).unwrap();
        let outcome = reconcile(&harness.ctx, &dir).await.unwrap();
        let ReconcileOutcome::Disabled(disabled) = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(disabled.reason, DisableReason::NoManifest);
        assert_eq!(disabled.renamed_to, harness.root().join("invalid-no-manifest-favorites-3-Empty"));
        assert!(harness.source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_origin_url_disables() {
        let harness = Harness::new();
        let dir = harness.root().join("upload-BV1-Clip");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("24-05-01-12-30.csv"), "item_url,title,downloaded\nA,A,False\n").unwrap();
        let outcome = reconcile(&harness.ctx, &dir).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Disabled(Disabled { reason: DisableReason::NoUrl, .. })));
    }

    #[tokio::test]
    async fn test_corrupt_manifest_disables() {
        let harness = Harness::new();
        let dir = harness.root().join("upload-BV1-Clip");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("24-05-01-12-30.csv"), "# Original URL: https://example.com\nfoo,bar\n1,2\n").unwrap();
        let outcome = reconcile(&harness.ctx, &dir).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Disabled(Disabled { reason: DisableReason::Corrupt, .. })));
    }

    #[tokio::test]
    async fn test_paused_monitor_skips_enumeration() {
        let harness = Harness::new();
        let dir = seed(harness.root(), "series-7-Lectures", "https://example.com/series/7", &[item("A", false)]);
        harness.throttle().await;
        let calls = harness.source.calls().len();
        assert_eq!(reconcile(&harness.ctx, &dir).await.unwrap(), ReconcileOutcome::Paused);
        assert_eq!(harness.source.calls().len(), calls);
    }

    #[tokio::test]
    async fn test_renamed_collection_disables() {
        let harness = Harness::new();
        let dir = seed(harness.root(), "series-7-Lectures", "https://example.com/series/7", &[item("A", false)]);
        harness.source.set_response(
            "https://example.com/series/7",
            MockResponse::Listing(listing("series-7-Lectures (2024)", &["A"])),
        );
        let outcome = reconcile(&harness.ctx, &dir).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Disabled(Disabled { reason: DisableReason::Renamed, .. })));
        assert!(harness.root().join("invalid-renamed-series-7-Lectures").is_dir());
    }

    #[tokio::test]
    async fn test_genuinely_empty_collection_disables() {
        let harness = Harness::new();
        harness.add_probe("https://example.com/healthy", 8);
        let dir = seed(harness.root(), "series-7-Lectures", "https://example.com/series/7", &[item("A", false)]);
        harness.source.set_response(
            "https://example.com/series/7",
            MockResponse::Listing(Listing::new("series-7-Lectures", vec![])),
        );
        let outcome = reconcile(&harness.ctx, &dir).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Disabled(Disabled { reason: DisableReason::Empty, .. })));
        assert!(!harness.ctx.risk.is_paused());
    }

    #[tokio::test]
    async fn test_throttled_empty_listing_pauses() {
        let harness = Harness::new();
        harness.add_probe("https://example.com/healthy", 8);
        harness.source.set_response("https://example.com/healthy", MockResponse::Throttled);
        let dir = seed(harness.root(), "series-7-Lectures", "https://example.com/series/7", &[item("A", false)]);
        harness.source.set_response(
            "https://example.com/series/7",
            MockResponse::Listing(Listing::new("series-7-Lectures", vec![])),
        );
        assert_eq!(reconcile(&harness.ctx, &dir).await.unwrap(), ReconcileOutcome::Paused);
        assert!(harness.ctx.risk.is_paused());
        assert!(dir.is_dir());
        assert_eq!(ManifestStore::new(&dir).stats().unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_empty_listing_genuine_then_throttled() {
        let harness = Harness::new();
        harness.add_probe("https://example.com/healthy", 8);
        let quiet = seed(harness.root(), "series-1-Quiet", "https://example.com/series/1", &[item("A", true)]);
        harness.source.set_response("https://example.com/series/1", MockResponse::Listing(listing("series-1-Quiet", &[])));
        let later = seed(harness.root(), "series-2-Later", "https://example.com/series/2", &[item("B", false)]);
        harness.source.set_response("https://example.com/series/2", MockResponse::Listing(listing("series-2-Later", &[])));

        let outcome = reconcile(&harness.ctx, &quiet).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Disabled(Disabled { reason: DisableReason::Empty, .. })));
        assert_eq!(harness.ctx.risk.state(), ThrottleState::Normal);
        assert!(harness.root().join("invalid-empty-series-1-Quiet").is_dir());

        harness.source.set_response("https://example.com/healthy", MockResponse::Throttled);
        assert_eq!(reconcile(&harness.ctx, &later).await.unwrap(), ReconcileOutcome::Paused);
        assert_eq!(harness.ctx.risk.state(), ThrottleState::ConfirmedThrottled);
        assert!(later.is_dir());
        assert_eq!(ManifestStore::new(&later).pending_items().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_first_cycle_of_an_empty_manifest() {
        let transfer = MockTransfer::new()
            .with_step("A", MockStep::fail("segfault"))
            .with_step("B", MockStep::fail("啊叻？视频不存在"))
            .with_step("C", MockStep::fail("segfault"));
        let harness = Harness::with_transfer(transfer);
        let dir = seed(harness.root(), "series-7-Lectures", "https://example.com/series/7", &[]);
        harness.source.set_response(
            "https://example.com/series/7",
            MockResponse::Listing(listing("series-7-Lectures", &["A", "B", "C"])),
        );

        let ReconcileOutcome::Pending(pending) = reconcile(&harness.ctx, &dir).await.unwrap() else {
            panic!("expected pending items");
        };
        assert_eq!(pending.len(), 3);
        let manifest = ManifestStore::new(&dir).load().unwrap().unwrap();
        assert_eq!(manifest.items.len(), 3);
        assert!(manifest.items.iter().all(|item| !item.downloaded));

        let summary = crate::fetch_pending(&harness.ctx, &dir, pending, &TaskControl::new()).await.unwrap();
        assert_eq!((summary.skipped, summary.failed), (1, 2));
        assert_eq!(ManifestStore::new(&dir).stats().unwrap(), Stats {
            total: 3,
            downloaded: 1,
            pending: 2,
        });
        assert!(ManifestStore::new(&dir).load().unwrap().unwrap().get("B").unwrap().downloaded);
    }

    #[tokio::test]
    async fn test_empty_listing_without_probes_is_untouched() {
        let harness = Harness::new();
        let dir = seed(harness.root(), "series-7-Lectures", "https://example.com/series/7", &[item("A", false)]);
        harness.source.set_response(
            "https://example.com/series/7",
            MockResponse::Listing(Listing::new("series-7-Lectures", vec![])),
        );
        assert_eq!(reconcile(&harness.ctx, &dir).await.unwrap(), ReconcileOutcome::Untouched);
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_throttle_sentinel() {
        let harness = Harness::new();
        let dir = seed(harness.root(), "series-7-Lectures", "https://example.com/series/7", &[item("A", false)]);
        harness.source.set_response("https://example.com/series/7", MockResponse::Throttled);
        assert_eq!(reconcile(&harness.ctx, &dir).await.unwrap(), ReconcileOutcome::Untouched);

        harness.add_probe("https://example.com/healthy", 8);
        harness.source.set_response("https://example.com/healthy", MockResponse::NetworkError);
        assert_eq!(reconcile(&harness.ctx, &dir).await.unwrap(), ReconcileOutcome::Paused);
    }

    #[tokio::test]
    async fn test_gone_collection_disables() {
        let harness = Harness::new();
        let dir = seed(harness.root(), "channel-5-Someone", "https://space.bilibili.com/5", &[item("A", true)]);
        harness.source.set_response("https://space.bilibili.com/5", MockResponse::Gone);
        let outcome = reconcile(&harness.ctx, &dir).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Disabled(Disabled { reason: DisableReason::Gone, .. })));
    }

    #[tokio::test]
    async fn test_transient_failure_propagates() {
        let harness = Harness::new();
        let dir = seed(harness.root(), "series-7-Lectures", "https://example.com/series/7", &[item("A", false)]);
        harness.source.set_response("https://example.com/series/7", MockResponse::NetworkError);
        let err = reconcile(&harness.ctx, &dir).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Source));
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_successful_listing_becomes_probe() {
        let harness = Harness::new();
        let urls = ["A", "B", "C", "D", "E"];
        let dir = seed(harness.root(), "series-7-Lectures", "https://example.com/series/7", &[item("A", false)]);
        harness.source.set_response(
            "https://example.com/series/7",
            MockResponse::Listing(listing("series-7-Lectures", &urls)),
        );
        reconcile(&harness.ctx, &dir).await.unwrap();
        let probes = harness.ctx.risk.status().probes;
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].url, "https://example.com/series/7");
    }

    #[test]
    fn test_to_manifest_item() {
        let remote = RemoteItem::new("https://www.bilibili.com/video/BV1", "Title")
            .with_state(ItemState::Placeholder)
            .with_parts(3);
        let record = to_manifest_item(&remote);
        assert_eq!(record.status, Status::Pending);
        assert!(record.multi_part);
        assert_eq!(record.part_count, 3);
        assert!(!record.downloaded);

        let mut escaping = RemoteItem::new("https://www.bilibili.com/video/BV2", "Why: not?");
        escaping.path = PathBuf::from("../../etc");
        assert_eq!(to_manifest_item(&escaping).download_path, PathBuf::from("Why_ not_"));
    }
}
