//! Collection directories.
//!
//! Each collection lives in `<root>/<prefix>-<id>-<name>` next to its
//! manifest. A collection that can no longer be synced is never deleted: the
//! directory is renamed to `invalid-<reason>-<original name>`, which no
//! longer matches any prefix and drops it out of every later scan.

use crate::error::{ErrorKind, Result};
use derive_more::Display;
use exn::ResultExt;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::macros::format_description;
use vidsync_manifest::ManifestStore;
use vidsync_source::CollectionKind;

pub const DISABLED_PREFIX: &str = "invalid-";

/// Why a collection directory was taken out of rotation.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum DisableReason {
    #[display("no-manifest")]
    NoManifest,
    /// The manifest has no `# Original URL:` header.
    #[display("no-url")]
    NoUrl,
    /// The manifest can't be decoded or lacks required columns.
    #[display("corrupt")]
    Corrupt,
    /// The remote reports a different title than the directory name.
    #[display("renamed")]
    Renamed,
    /// The remote collection is genuinely empty.
    #[display("empty")]
    Empty,
    /// The remote collection was deleted or made private.
    #[display("gone")]
    Gone,
}

/// A disabled collection and where it went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disabled {
    pub reason: DisableReason,
    pub renamed_to: PathBuf,
}

/// A directory found under the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovered {
    /// Recognized prefix and a manifest snapshot: worth updating.
    Collection(PathBuf, CollectionKind),
    /// Anything else, disabled collections included.
    Ignored(PathBuf),
}

pub fn dir_name(dir: &Path) -> &str {
    dir.file_name().and_then(|name| name.to_str()).unwrap_or_default()
}

/// Collection kind from the directory name, if it is one of ours.
pub fn kind_of(dir: &Path) -> Option<CollectionKind> {
    CollectionKind::from_dir_name(dir_name(dir))
}

/// Whether `dir` looks like an updatable collection: a recognized prefix and
/// at least one manifest snapshot. The manifest's contents are checked later
/// by the reconciler.
pub fn inspect(dir: &Path) -> Result<Option<CollectionKind>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let Some(kind) = kind_of(dir) else {
        return Ok(None);
    };
    let generations = ManifestStore::new(dir).generations().or_raise(|| ErrorKind::Manifest)?;
    Ok((!generations.is_empty()).then_some(kind))
}

/// Every directory directly under `root`, sorted by name.
pub fn discover(root: &Path) -> Result<Vec<Discovered>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root).or_raise(|| ErrorKind::Io)? {
        let entry = entry.or_raise(|| ErrorKind::Io)?;
        if entry.file_type().or_raise(|| ErrorKind::Io)?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    let mut discovered = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let found = match inspect(&dir) {
            Ok(Some(kind)) => Discovered::Collection(dir, kind),
            Ok(None) => Discovered::Ignored(dir),
            Err(err) => {
                tracing::warn!(dir = %dir.display(), error = ?err, "Could not inspect directory");
                Discovered::Ignored(dir)
            },
        };
        discovered.push(found);
    }
    Ok(discovered)
}

/// Renames `dir` to `invalid-<reason>-<name>`, appending a timestamp when
/// that name is taken.
pub fn disable(dir: &Path, reason: DisableReason) -> Result<Disabled> {
    let name = dir_name(dir);
    let parent = dir.parent().unwrap_or_else(|| Path::new("."));
    let base = format!("{DISABLED_PREFIX}{reason}-{name}");
    let mut target = parent.join(&base);
    if target.exists() {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let stamp = now
            .format(format_description!("[year][month][day]-[hour][minute][second]"))
            .or_raise(|| ErrorKind::Io)?;
        target = parent.join(format!("{base}-{stamp}"));
    }
    fs::rename(dir, &target).or_raise(|| ErrorKind::Io)?;
    tracing::warn!(%reason, from = name, to = dir_name(&target), "Disabled collection directory");
    Ok(Disabled {
        reason,
        renamed_to: target,
    })
}
