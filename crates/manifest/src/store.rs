use crate::codec;
use crate::encoding;
use crate::error::{ErrorKind, Result};
use crate::generation::Generation;
use crate::models::{ItemFields, Manifest, ManifestItem, Stats};
use exn::{OptionExt, ResultExt};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Snapshot store for one collection directory.
///
/// Every mutation is a read-modify-write of the whole manifest: the new
/// snapshot is written to a `temp_*.csv` file in the same directory, synced,
/// then renamed over its generation name. Older snapshots are only removed
/// after that rename, so a crash at any point leaves at least one complete
/// snapshot behind and never a half-written one.
///
/// The store does no locking of its own; callers run at most one writer per
/// collection.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All snapshot generations in the directory, oldest first.
    pub fn generations(&self) -> Result<Vec<Generation>> {
        let mut generations = Vec::new();
        for entry in fs::read_dir(&self.dir).or_raise(|| ErrorKind::Io)? {
            let entry = entry.or_raise(|| ErrorKind::Io)?;
            if !entry.file_type().or_raise(|| ErrorKind::Io)?.is_file() {
                continue;
            }
            if let Some(generation) = entry.file_name().to_str().and_then(Generation::from_file_name) {
                generations.push(generation);
            }
        }
        generations.sort();
        Ok(generations)
    }

    pub fn latest(&self) -> Result<Option<Generation>> {
        Ok(self.generations()?.pop())
    }

    /// Loads the authoritative snapshot, or `None` if the directory has none.
    ///
    /// An existing snapshot with zero valid rows loads as an empty manifest.
    #[instrument(skip_all, fields(dir = %self.dir.display()))]
    pub fn load(&self) -> Result<Option<Manifest>> {
        let Some(generation) = self.latest()? else {
            return Ok(None);
        };
        let bytes = fs::read(self.dir.join(generation.file_name())).or_raise(|| ErrorKind::Io)?;
        let decoded = codec::decode(&encoding::decode(&bytes)?)?;
        tracing::debug!(%generation, items = decoded.items.len(), "Loaded manifest");
        Ok(Some(Manifest {
            origin_url: decoded.origin_url,
            generation,
            items: decoded.items,
        }))
    }

    fn load_existing(&self) -> Result<Manifest> {
        self.load()?.ok_or_raise(|| ErrorKind::NoManifest(self.dir.clone()))
    }

    /// The collection's remote locator, from the latest snapshot's header.
    pub fn original_url(&self) -> Result<Option<String>> {
        Ok(self.load()?.and_then(|manifest| manifest.origin_url))
    }

    /// Writes `items` as a brand-new snapshot, superseding whatever exists.
    pub fn save(&self, items: &[ManifestItem], origin_url: &str) -> Result<Generation> {
        let previous = self.latest()?;
        self.write_snapshot(items, Some(origin_url), previous.as_ref())
    }

    /// Merges freshly enumerated items into the manifest.
    ///
    /// Records already present are copied forward untouched (so `downloaded`
    /// never regresses); new ones are appended as not downloaded, unless they
    /// arrive already unavailable. Items the remote no longer lists are kept.
    /// Creates the first snapshot when the directory has none.
    #[instrument(skip_all, fields(dir = %self.dir.display(), incoming = incoming.len()))]
    pub fn merge(&self, incoming: Vec<ManifestItem>, origin_url: &str) -> Result<Generation> {
        let (previous, origin, existing) = match self.load()? {
            Some(manifest) => {
                let origin = match manifest.origin_url {
                    Some(recorded) if recorded != origin_url => {
                        tracing::warn!(%recorded, requested = origin_url, "Keeping recorded origin URL");
                        recorded
                    },
                    _ => origin_url.to_string(),
                };
                (Some(manifest.generation), origin, manifest.items)
            },
            None => (None, origin_url.to_string(), Vec::new()),
        };
        let merged = merge_items(existing, incoming);
        self.write_snapshot(&merged, Some(&origin), previous.as_ref())
    }

    /// Marks one item as downloaded, recording its folder size when known.
    pub fn mark_downloaded(&self, item_url: &str, folder_size: Option<u64>) -> Result<Generation> {
        self.modify_item(item_url, |item| {
            item.downloaded = true;
            if folder_size.is_some() {
                item.folder_size = folder_size;
            }
        })
    }

    pub fn update_item_fields(&self, item_url: &str, fields: ItemFields) -> Result<Generation> {
        self.modify_item(item_url, |item| item.apply(fields))
    }

    fn modify_item(&self, item_url: &str, f: impl FnOnce(&mut ManifestItem)) -> Result<Generation> {
        let mut manifest = self.load_existing()?;
        let item = manifest
            .items
            .iter_mut()
            .find(|item| item.item_url == item_url)
            .ok_or_raise(|| ErrorKind::ItemNotFound(item_url.to_string()))?;
        f(item);
        self.write_snapshot(&manifest.items, manifest.origin_url.as_deref(), Some(&manifest.generation))
    }

    /// Every record not yet downloaded, in manifest order.
    pub fn pending_items(&self) -> Result<Vec<ManifestItem>> {
        Ok(self.load()?.map(|manifest| manifest.pending()).unwrap_or_default())
    }

    pub fn stats(&self) -> Result<Stats> {
        Ok(self.load()?.map(|manifest| manifest.stats()).unwrap_or_default())
    }

    pub fn known_urls(&self) -> Result<HashSet<String>> {
        Ok(self.load()?.map(|manifest| manifest.urls()).unwrap_or_default())
    }

    fn write_snapshot(
        &self,
        items: &[ManifestItem],
        origin_url: Option<&str>,
        previous: Option<&Generation>,
    ) -> Result<Generation> {
        let generation = Generation::after(previous);
        let bytes = codec::encode(origin_url, items)?;

        // Dropping the temp file on any error below deletes it; the previous
        // snapshot is untouched until the rename succeeds.
        let mut tmp = tempfile::Builder::new()
            .prefix("temp_")
            .suffix(".csv")
            .tempfile_in(&self.dir)
            .or_raise(|| ErrorKind::Io)?;
        tmp.write_all(&bytes).or_raise(|| ErrorKind::Io)?;
        tmp.as_file().sync_all().or_raise(|| ErrorKind::Io)?;
        tmp.persist(self.dir.join(generation.file_name())).map_err(|err| err.error).or_raise(|| ErrorKind::Io)?;

        for stale in self.generations()?.into_iter().filter(|g| *g != generation) {
            if let Err(err) = fs::remove_file(self.dir.join(stale.file_name())) {
                tracing::warn!(%stale, error = %err, "Could not remove superseded manifest");
            }
        }
        tracing::debug!(%generation, items = items.len(), "Wrote manifest");
        Ok(generation)
    }
}

fn merge_items(existing: Vec<ManifestItem>, incoming: Vec<ManifestItem>) -> Vec<ManifestItem> {
    let order: Vec<String> = existing.iter().map(|item| item.item_url.clone()).collect();
    let mut existing: HashMap<String, ManifestItem> =
        existing.into_iter().map(|item| (item.item_url.clone(), item)).collect();
    let mut merged = Vec::with_capacity(order.len() + incoming.len());
    let mut seen = HashSet::new();
    for mut item in incoming {
        if !seen.insert(item.item_url.clone()) {
            continue;
        }
        match existing.remove(&item.item_url) {
            Some(record) => merged.push(record),
            None => {
                item.downloaded = false;
                merged.push(item);
            },
        }
    }
    merged.extend(order.iter().filter_map(|url| existing.remove(url)));
    merged
}
