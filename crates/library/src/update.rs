use crate::collection::{self, Disabled, Discovered};
use crate::control::TaskControl;
use crate::error::{Error, ErrorKind, Result};
use crate::fetch::{FetchSummary, fetch_pending};
use crate::reconcile::{ReconcileOutcome, reconcile, to_manifest_item};
use crate::Context;
use async_stream::stream;
use exn::{OptionExt, ResultExt};
use futures::Stream;
use std::path::{Path, PathBuf};
use tracing::instrument;
use vidsync_manifest::ManifestStore;
use vidsync_manifest::path::sanitize_component;
use vidsync_risk::Verdict;
use vidsync_source::{CollectionKind, Enumeration};

/// How one collection's update cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Disabled(Disabled),
    /// Rate limiting is in effect. Nothing was enumerated or downloaded.
    Paused,
    /// The remote's answer was inconclusive; try again next cycle.
    Untouched,
    Fetched(FetchSummary),
}

impl From<FetchSummary> for UpdateOutcome {
    fn from(summary: FetchSummary) -> Self {
        Self::Fetched(summary)
    }
}

#[derive(Debug)]
pub enum UpdateEvent {
    Started,
    /// Number of collections that will be updated.
    DiscoveryComplete(u64),
    /// A directory under the root that isn't an updatable collection.
    Skipped(PathBuf),
    Updated(PathBuf, UpdateOutcome),
    /// This collection failed; the batch carries on.
    Failed(PathBuf, Error),
    /// Rate limiting was confirmed. The batch stops here and the remaining
    /// collections are left for the next cycle.
    Paused,
    Complete,
}

/// Updates every collection under `root`, one at a time, in name order.
///
/// The stream ends after [`Complete`](UpdateEvent::Complete), after
/// [`Paused`](UpdateEvent::Paused), or after an `Err` for a failure that
/// would hit every remaining collection too (see
/// [`ErrorKind::is_fatal`]).
pub fn update_all<'a>(
    ctx: &'a Context,
    root: &'a Path,
    control: &'a TaskControl,
) -> impl Stream<Item = Result<UpdateEvent>> + 'a {
    stream! {
        yield Ok(UpdateEvent::Started);
        if ctx.risk.is_paused() && !ctx.risk.check_resolved(ctx.source.as_ref()).await {
            tracing::warn!("Rate limiting still in effect; skipping this cycle");
            yield Ok(UpdateEvent::Paused);
            return;
        }

        let discovered = match collection::discover(root) {
            Ok(discovered) => discovered,
            Err(err) => {
                yield Err(err);
                return;
            },
        };
        let candidates = discovered.iter().filter(|found| matches!(found, Discovered::Collection(..))).count();
        tracing::info!(root = %root.display(), collections = candidates, "Discovered collections");
        yield Ok(UpdateEvent::DiscoveryComplete(candidates as u64));

        for found in discovered {
            let dir = match found {
                Discovered::Collection(dir, _) => dir,
                Discovered::Ignored(dir) => {
                    tracing::debug!(dir = %dir.display(), "Not a collection; skipping");
                    yield Ok(UpdateEvent::Skipped(dir));
                    continue;
                },
            };
            if control.is_cancelled() {
                yield Err(exn::Exn::from(ErrorKind::Cancelled));
                return;
            }
            match cycle(ctx, &dir, control).await {
                Ok(UpdateOutcome::Paused) => {
                    tracing::warn!(dir = %dir.display(), "Rate limiting confirmed; stopping the batch");
                    yield Ok(UpdateEvent::Paused);
                    return;
                },
                Ok(outcome) => yield Ok(UpdateEvent::Updated(dir, outcome)),
                Err(err) if err.is_fatal() => {
                    tracing::error!(dir = %dir.display(), error = ?err, "Stopping the batch");
                    yield Err(err);
                    return;
                },
                Err(err) => {
                    tracing::warn!(dir = %dir.display(), error = ?err, "Collection failed; continuing with the next");
                    yield Ok(UpdateEvent::Failed(dir, err));
                },
            }
        }
        tracing::info!("Finished updating collections");
        yield Ok(UpdateEvent::Complete);
    }
}

/// Runs one update cycle for a single collection directory.
///
/// # Errors
/// [`InvalidCollection`](ErrorKind::InvalidCollection) when `dir` has no
/// recognized prefix or no manifest snapshot.
pub async fn update_one(ctx: &Context, dir: &Path, control: &TaskControl) -> Result<UpdateOutcome> {
    if collection::inspect(dir)?.is_none() {
        exn::bail!(ErrorKind::InvalidCollection(dir.to_path_buf()));
    }
    cycle(ctx, dir, control).await
}

#[instrument(skip_all, fields(dir = %collection::dir_name(dir)))]
async fn cycle(ctx: &Context, dir: &Path, control: &TaskControl) -> Result<UpdateOutcome> {
    let pending = match reconcile(ctx, dir).await? {
        ReconcileOutcome::Disabled(disabled) => return Ok(UpdateOutcome::Disabled(disabled)),
        ReconcileOutcome::Paused => return Ok(UpdateOutcome::Paused),
        ReconcileOutcome::Untouched => return Ok(UpdateOutcome::Untouched),
        ReconcileOutcome::Pending(pending) => pending,
    };
    report(dir, control);
    fetch_pending(ctx, dir, pending, control).await.map(UpdateOutcome::from)
}

/// Starts (or resumes) mirroring the collection at `url` under `root`.
///
/// The directory is named after the listing's canonical title, so calling
/// this again for the same URL continues where the last call stopped.
///
/// # Errors
/// [`Source`](ErrorKind::Source) when the remote can't be listed, including
/// when it doesn't exist.
#[instrument(skip_all, fields(url = %url))]
pub async fn sync_url(ctx: &Context, root: &Path, url: &str, control: &TaskControl) -> Result<UpdateOutcome> {
    if ctx.risk.is_paused() {
        tracing::info!("Rate limiting in effect; not enumerating");
        return Ok(UpdateOutcome::Paused);
    }
    let kind = CollectionKind::from_url(url);
    let listing = match ctx.source.enumerate(url).await.or_raise(|| ErrorKind::Source)? {
        Enumeration::Listed(listing) if !listing.items.is_empty() => listing,
        enumeration => {
            tracing::warn!(throttled = enumeration.item_count().is_none(), "Nothing listed; checking for rate limiting");
            return match ctx.risk.confirm(ctx.source.as_ref()).await {
                Verdict::Throttled => Ok(UpdateOutcome::Paused),
                Verdict::Genuine | Verdict::Inconclusive => Ok(UpdateOutcome::Untouched),
            };
        },
    };

    let name = sanitize_component(&listing.title).ok_or_raise(|| ErrorKind::InvalidCollection(root.join(&listing.title)))?;
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).or_raise(|| ErrorKind::Io)?;
    let store = ManifestStore::new(&dir);
    let incoming = listing.items.iter().map(to_manifest_item).collect();
    store.merge(incoming, url).or_raise(|| ErrorKind::Manifest)?;
    ctx.risk.record_success(url, kind, listing.items.len());
    tracing::info!(dir = %dir.display(), listed = listing.items.len(), "Collection manifest written");

    let pending = store.pending_items().or_raise(|| ErrorKind::Manifest)?;
    report(&dir, control);
    fetch_pending(ctx, &dir, pending, control).await.map(UpdateOutcome::from)
}

fn report(dir: &Path, control: &TaskControl) {
    match ManifestStore::new(dir).stats() {
        Ok(stats) => control.report(stats),
        Err(err) => tracing::warn!(error = ?err, "Could not read progress"),
    }
}
