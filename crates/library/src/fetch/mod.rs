//! Draining a collection's pending items.
//!
//! Items are handled one at a time, in manifest order: placeholders are
//! resolved first, leftovers of earlier attempts are cleaned up, then the
//! downloader runs with bounded retries. Only a finished transfer (or one the
//! downloader says can never succeed) is recorded as downloaded; everything
//! else stays pending for the next cycle.

mod cleanup;

use crate::collection;
use crate::control::TaskControl;
use crate::error::{ErrorKind, Result};
use crate::size::{folder_size, format_size};
use crate::Context;
use exn::ResultExt;
use std::path::Path;
use tracing::instrument;
use vidsync_manifest::{ItemFields, ManifestItem, ManifestStore, Status, validate_path};
use vidsync_source::CollectionKind;
use vidsync_transfer::error::ErrorKind as TransferErrorKind;
use vidsync_transfer::{FailureKind, Outcome, TransferRequest};

/// What happened to the pending items of one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub downloaded: usize,
    /// The downloader reported the item can never be fetched.
    pub skipped: usize,
    /// Already known, or found during resolution, to be gone.
    pub unavailable: usize,
    /// Left pending for the next cycle.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemResult {
    Downloaded,
    Skipped,
    Unavailable,
    Failed,
}

impl FetchSummary {
    fn record(&mut self, result: ItemResult) {
        match result {
            ItemResult::Downloaded => self.downloaded += 1,
            ItemResult::Skipped => self.skipped += 1,
            ItemResult::Unavailable => self.unavailable += 1,
            ItemResult::Failed => self.failed += 1,
        }
    }
}

/// Processes `items` (normally the collection's pending items) in order.
///
/// # Errors
/// Stops early with [`Cancelled`](ErrorKind::Cancelled) when `control` is
/// cancelled (the in-flight item is not marked), with
/// [`Configuration`](ErrorKind::Configuration) when the downloader rejects
/// the credentials, and with [`Transfer`](ErrorKind::Transfer) when it can't
/// be run at all. Manifest write failures also abort.
#[instrument(skip_all, fields(dir = %dir.display(), pending = items.len()))]
pub async fn fetch_pending(
    ctx: &Context,
    dir: &Path,
    items: Vec<ManifestItem>,
    control: &TaskControl,
) -> Result<FetchSummary> {
    let store = ManifestStore::new(dir);
    let kind = collection::kind_of(dir);
    let total = items.len();
    let mut summary = FetchSummary::default();
    for (index, item) in items.into_iter().enumerate() {
        if control.is_cancelled() {
            tracing::warn!(remaining = total - index, "Stop requested; leaving remaining items pending");
            exn::bail!(ErrorKind::Cancelled);
        }
        tracing::info!(position = index + 1, total, name = %item.name, "Processing item");
        let result = fetch_item(ctx, &store, kind, item, control).await;
        match store.stats() {
            Ok(stats) => control.report(stats),
            Err(err) => tracing::warn!(error = ?err, "Could not refresh progress"),
        }
        let result = result?;
        summary.record(result);

        let cooldown = match result {
            _ if index + 1 == total => None,
            ItemResult::Failed => Some(ctx.settings.failure_cooldown),
            _ => Some(ctx.settings.item_cooldown),
        };
        if let Some(cooldown) = cooldown {
            control.pause(cooldown).await;
        }
    }
    tracing::info!(
        downloaded = summary.downloaded,
        skipped = summary.skipped,
        unavailable = summary.unavailable,
        failed = summary.failed,
        "Finished pending items"
    );
    Ok(summary)
}

#[instrument(skip_all, fields(url = %item.item_url))]
async fn fetch_item(
    ctx: &Context,
    store: &ManifestStore,
    kind: Option<CollectionKind>,
    mut item: ManifestItem,
    control: &TaskControl,
) -> Result<ItemResult> {
    match item.status {
        Status::Unavailable => {
            tracing::info!("Item is unavailable; marking it done");
            store.mark_downloaded(&item.item_url, Some(0)).or_raise(|| ErrorKind::Manifest)?;
            return Ok(ItemResult::Unavailable);
        },
        Status::Pending => {
            if let Some(result) = resolve(ctx, store, &mut item).await? {
                return Ok(result);
            }
        },
        Status::Normal => {},
    }

    let download_path = match validate_path(&item.download_path) {
        Ok(path) => path,
        Err(err) => {
            tracing::warn!(path = %item.download_path.display(), error = ?err, "Item has an unusable download path");
            return Ok(ItemResult::Failed);
        },
    };
    let output_dir = store.dir().join(&download_path);
    let request = TransferRequest::new(&item.item_url, &output_dir)
        .batch(item.multi_part || kind.is_some_and(|kind| kind.needs_batch()))
        .credential(ctx.settings.credential.clone())
        .extra_args(ctx.settings.extra_args.clone());

    let max_attempts = ctx.settings.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        cleanup::clean_output(store.dir(), &download_path);
        if attempt > 1 {
            let delay = ctx.settings.retry_delay(attempt - 1);
            tracing::info!(attempt, max_attempts, delay_secs = delay.as_secs(), "Retrying transfer");
            if !control.pause(delay).await {
                exn::bail!(ErrorKind::Cancelled);
            }
        }
        let report = match ctx.transfer.run(&request, control.token()).await {
            Ok(report) => report,
            Err(err) if matches!(&*err, TransferErrorKind::Cancelled) => {
                return Err(err).or_raise(|| ErrorKind::Cancelled);
            },
            Err(err) if err.is_retryable() => {
                tracing::warn!(attempt, error = ?err, "Transfer could not complete");
                continue;
            },
            Err(err) => return Err(err).or_raise(|| ErrorKind::Transfer),
        };
        match report.outcome {
            Outcome::Success => {
                let size = measure(ctx, &output_dir, control).await;
                store.mark_downloaded(&item.item_url, Some(size)).or_raise(|| ErrorKind::Manifest)?;
                tracing::info!(attempt, size = %format_size(size), "Downloaded item");
                return Ok(ItemResult::Downloaded);
            },
            Outcome::ShouldSkip => {
                tracing::info!(indicator = report.indicator, "Item can't be downloaded; marking it done");
                store.mark_downloaded(&item.item_url, None).or_raise(|| ErrorKind::Manifest)?;
                return Ok(ItemResult::Skipped);
            },
            Outcome::Retry => {
                tracing::warn!(attempt, max_attempts, indicator = report.indicator, "Transient transfer failure");
            },
            Outcome::Failure(FailureKind::Configuration) => {
                let indicator = report.indicator.unwrap_or("configuration");
                tracing::error!(indicator, "Downloader rejected the configuration; stopping");
                exn::bail!(ErrorKind::Configuration(indicator.to_string()));
            },
            Outcome::Failure(FailureKind::Unrecognized) => {
                tracing::warn!(exit_code = ?report.exit_code, "Unrecognized transfer failure; leaving item pending");
                return Ok(ItemResult::Failed);
            },
        }
    }
    tracing::error!(max_attempts, "Transfer still failing after every attempt; leaving item pending");
    Ok(ItemResult::Failed)
}

/// Fills in a placeholder's metadata. `Some` when the item is finished with
/// for this cycle.
async fn resolve(ctx: &Context, store: &ManifestStore, item: &mut ManifestItem) -> Result<Option<ItemResult>> {
    match ctx.source.resolve_item(&item.item_url).await {
        Ok(resolved) => {
            let part_count = resolved.part_count.max(1);
            let download_path = match resolved.path.as_os_str().is_empty() {
                true => None,
                false => validate_path(&resolved.path)
                    .inspect_err(|err| tracing::warn!(error = ?err, "Resolved path is unusable; keeping the listed one"))
                    .ok(),
            };
            let fields = ItemFields {
                title: Some(resolved.title).filter(|title| !title.is_empty()),
                name: Some(resolved.name).filter(|name| !name.is_empty()),
                download_path,
                container_id: Some(resolved.container_id).filter(|id| !id.is_empty()),
                content_id: resolved.content_id,
                pubdate: Some(resolved.pubdate).filter(|pubdate| *pubdate > 0),
                status: Some(Status::Normal),
                multi_part: Some(part_count > 1),
                part_count: Some(part_count),
                ..ItemFields::default()
            };
            store.update_item_fields(&item.item_url, fields.clone()).or_raise(|| ErrorKind::Manifest)?;
            item.apply(fields);
            tracing::debug!(title = %item.title, path = %item.download_path.display(), part_count, "Resolved placeholder");
            Ok(None)
        },
        Err(err) if err.is_permanent() => {
            tracing::warn!(error = ?err, "Item is gone; marking it unavailable");
            let fields = ItemFields {
                status: Some(Status::Unavailable),
                ..ItemFields::default()
            };
            store.update_item_fields(&item.item_url, fields).or_raise(|| ErrorKind::Manifest)?;
            store.mark_downloaded(&item.item_url, Some(0)).or_raise(|| ErrorKind::Manifest)?;
            Ok(Some(ItemResult::Unavailable))
        },
        Err(err) => {
            tracing::warn!(error = ?err, "Could not resolve item; leaving it pending");
            Ok(Some(ItemResult::Failed))
        },
    }
}

/// Output size, measured once more after a pause if the first look finds
/// nothing (the downloader may still be flushing).
async fn measure(ctx: &Context, output_dir: &Path, control: &TaskControl) -> u64 {
    let size = folder_size(output_dir);
    if size > 0 {
        return size;
    }
    control.pause(ctx.settings.size_recheck).await;
    folder_size(output_dir)
}
