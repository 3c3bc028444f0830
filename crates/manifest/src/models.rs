use crate::generation::Generation;
use derive_more::Display;
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;

/// Resolution state of a single item.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Status {
    /// Metadata is complete; the item can be transferred.
    #[default]
    #[display("normal")]
    Normal,
    /// Placeholder produced by a cheap listing; must be resolved first.
    #[display("pending")]
    Pending,
    /// Permanently gone upstream. Never transferred, always counted as done.
    #[display("unavailable")]
    Unavailable,
}

impl FromStr for Status {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            // Older manifests used "ready" for resolved items.
            "normal" | "ready" | "" => Ok(Self::Normal),
            "pending" => Ok(Self::Pending),
            "unavailable" => Ok(Self::Unavailable),
            _ => Err(()),
        }
    }
}

/// One row of a collection manifest, keyed by [`item_url`](Self::item_url).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub item_url: String,
    pub title: String,
    /// Display name, usually the title with filesystem-hostile characters removed.
    pub name: String,
    /// Output location relative to the collection directory.
    pub download_path: PathBuf,
    pub downloaded: bool,
    /// Platform container id (the "aid"/episode id). Empty when unknown.
    pub container_id: String,
    /// Platform content id (the "cid"). `None` until resolved.
    pub content_id: Option<String>,
    /// Unix epoch seconds; `0` means unknown.
    pub pubdate: i64,
    pub status: Status,
    pub multi_part: bool,
    pub part_count: u32,
    /// Measured size of the output folder after a successful transfer.
    pub folder_size: Option<u64>,
}

impl ManifestItem {
    /// A fresh, not yet downloaded record.
    pub fn new(item_url: impl Into<String>, title: impl Into<String>, download_path: impl Into<PathBuf>) -> Self {
        let title = title.into();
        Self {
            item_url: item_url.into(),
            name: title.clone(),
            title,
            download_path: download_path.into(),
            downloaded: false,
            container_id: String::new(),
            content_id: None,
            pubdate: 0,
            status: Status::Normal,
            multi_part: false,
            part_count: 1,
            folder_size: None,
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_parts(mut self, part_count: u32) -> Self {
        self.part_count = part_count.max(1);
        self.multi_part = self.part_count > 1;
        self
    }

    /// An item is resolved once it is no longer a placeholder.
    pub fn is_resolved(&self) -> bool {
        self.status != Status::Pending
    }

    /// Applies a partial update. `None` fields are left untouched.
    pub fn apply(&mut self, fields: ItemFields) {
        let ItemFields {
            title,
            name,
            download_path,
            container_id,
            content_id,
            pubdate,
            status,
            multi_part,
            part_count,
            folder_size,
        } = fields;
        if let Some(title) = title {
            self.title = title;
        }
        if let Some(name) = name {
            self.name = name;
        }
        if let Some(download_path) = download_path {
            self.download_path = download_path;
        }
        if let Some(container_id) = container_id {
            self.container_id = container_id;
        }
        if let Some(content_id) = content_id {
            self.content_id = Some(content_id).filter(|cid| !cid.is_empty() && cid != "0");
        }
        if let Some(pubdate) = pubdate {
            self.pubdate = pubdate;
        }
        if let Some(status) = status {
            self.status = status;
        }
        if let Some(multi_part) = multi_part {
            self.multi_part = multi_part;
        }
        if let Some(part_count) = part_count {
            self.part_count = part_count.max(1);
        }
        if let Some(folder_size) = folder_size {
            self.folder_size = Some(folder_size);
        }
    }
}

/// Typed partial update for [`ManifestItem`].
///
/// Neither the item URL (the key) nor `downloaded` can be patched; the flag
/// only moves forward through [`mark_downloaded`](crate::ManifestStore::mark_downloaded).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFields {
    pub title: Option<String>,
    pub name: Option<String>,
    pub download_path: Option<PathBuf>,
    pub container_id: Option<String>,
    pub content_id: Option<String>,
    pub pubdate: Option<i64>,
    pub status: Option<Status>,
    pub multi_part: Option<bool>,
    pub part_count: Option<u32>,
    pub folder_size: Option<u64>,
}

/// Download progress of a collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub total: usize,
    pub downloaded: usize,
    pub pending: usize,
}

impl Stats {
    /// Whole-number completion percentage; an empty collection is complete.
    pub fn percent(&self) -> u8 {
        match self.total {
            0 => 100,
            // Infallible: downloaded <= total, so the quotient is at most 100.
            total => u8::try_from(self.downloaded * 100 / total).unwrap_or(100),
        }
    }
}

/// A fully loaded snapshot.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub origin_url: Option<String>,
    pub generation: Generation,
    pub items: Vec<ManifestItem>,
}

impl Manifest {
    pub fn get(&self, item_url: &str) -> Option<&ManifestItem> {
        self.items.iter().find(|item| item.item_url == item_url)
    }

    pub fn urls(&self) -> HashSet<String> {
        self.items.iter().map(|item| item.item_url.clone()).collect()
    }

    pub fn pending(&self) -> Vec<ManifestItem> {
        self.items.iter().filter(|item| !item.downloaded).cloned().collect()
    }

    pub fn stats(&self) -> Stats {
        let downloaded = self.items.iter().filter(|item| item.downloaded).count();
        Stats {
            total: self.items.len(),
            downloaded,
            pending: self.items.len() - downloaded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("normal", Some(Status::Normal))]
    #[case("ready", Some(Status::Normal))]
    #[case("", Some(Status::Normal))]
    #[case(" Pending ", Some(Status::Pending))]
    #[case("UNAVAILABLE", Some(Status::Unavailable))]
    #[case("deleted", None)]
    fn test_status_parse(#[case] input: &str, #[case] expected: Option<Status>) {
        assert_eq!(input.parse::<Status>().ok(), expected);
    }

    #[test]
    fn test_apply_only_touches_given_fields() {
        let mut item = ManifestItem::new("https://example.com/v/1", "One", "One");
        item.apply(ItemFields {
            container_id: Some("av1".into()),
            content_id: Some("0".into()),
            status: Some(Status::Unavailable),
            ..Default::default()
        });
        assert_eq!(item.title, "One");
        assert_eq!(item.container_id, "av1");
        assert_eq!(item.content_id, None);
        assert_eq!(item.status, Status::Unavailable);
        assert!(!item.downloaded);
    }

    #[rstest]
    #[case(0, 0, 100)]
    #[case(3, 1, 33)]
    #[case(4, 4, 100)]
    fn test_percent(#[case] total: usize, #[case] downloaded: usize, #[case] expected: u8) {
        let stats = Stats {
            total,
            downloaded,
            pending: total - downloaded,
        };
        assert_eq!(stats.percent(), expected);
    }
}
