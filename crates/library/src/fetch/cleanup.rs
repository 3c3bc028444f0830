use std::fs;
use std::path::{Path, PathBuf};
use vidsync_manifest::Generation;

/// Files the downloader may leave next to an item's folder instead of in it.
const SIBLING_SUFFIXES: [&str; 7] = [".mp4", ".flv", ".ass", ".srt", "_audio.m4s", "_video.m4s", "-poster.jpg"];

/// Markers in generated subtitle file names ("Chinese", "auto-generated").
const SUBTITLE_MARKERS: [&str; 2] = ["中文", "自动生成"];

/// Removes whatever an earlier, interrupted transfer left for `download_path`
/// so the next one starts clean. Returns what was removed.
///
/// `download_path` must already be validated as relative to `collection_dir`;
/// nothing outside that directory is touched, and neither are snapshots.
pub(crate) fn clean_output(collection_dir: &Path, download_path: &Path) -> Vec<PathBuf> {
    let target = collection_dir.join(download_path);
    let Some(leaf) = target.file_name().and_then(|name| name.to_str()).map(str::to_string) else {
        return Vec::new();
    };
    let parent = target.parent().unwrap_or(collection_dir).to_path_buf();
    if !parent.starts_with(collection_dir) || target == collection_dir {
        tracing::warn!(path = %target.display(), "Refusing to clean outside the collection directory");
        return Vec::new();
    }

    let mut removed = Vec::new();
    if target.is_dir() {
        remove(&target, fs::remove_dir_all(&target), &mut removed);
    } else if target.is_file() {
        remove(&target, fs::remove_file(&target), &mut removed);
    }
    for suffix in SIBLING_SUFFIXES {
        let sibling = parent.join(format!("{leaf}{suffix}"));
        if sibling.is_file() {
            remove(&sibling, fs::remove_file(&sibling), &mut removed);
        }
    }
    if let Ok(entries) = fs::read_dir(&parent) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let is_subtitle = name.starts_with(&leaf) && SUBTITLE_MARKERS.iter().any(|marker| name.contains(marker));
            if is_subtitle && Generation::from_file_name(name).is_none() && entry.path().is_file() {
                let path = entry.path();
                remove(&path, fs::remove_file(&path), &mut removed);
            }
        }
    }

    if removed.is_empty() {
        tracing::debug!(path = %download_path.display(), "Nothing to clean up");
    } else {
        tracing::info!(path = %download_path.display(), removed = removed.len(), "Removed leftovers of an earlier transfer");
    }
    removed
}

fn remove(path: &Path, result: std::io::Result<()>, removed: &mut Vec<PathBuf>) {
    match result {
        Ok(()) => removed.push(path.to_path_buf()),
        Err(err) => tracing::warn!(path = %path.display(), error = %err, "Could not remove leftover"),
    }
}
