use std::collections::HashSet;
use std::path::PathBuf;

/// How much the remote listing told us about an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ItemState {
    /// Full metadata is present.
    #[default]
    Ready,
    /// Only the URL and a title are known; resolve before transferring.
    Placeholder,
    /// The listing still shows the item, but it is gone (deleted/private).
    Unavailable,
}

/// One entry of a remote collection, in the order the remote lists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub url: String,
    pub title: String,
    pub name: String,
    /// Suggested output location, relative to the collection directory.
    pub path: PathBuf,
    pub container_id: String,
    pub content_id: Option<String>,
    pub pubdate: i64,
    pub part_count: u32,
    pub state: ItemState,
}

impl RemoteItem {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            url: url.into(),
            name: title.clone(),
            path: PathBuf::from(&title),
            title,
            container_id: String::new(),
            content_id: None,
            pubdate: 0,
            part_count: 1,
            state: ItemState::Ready,
        }
    }

    pub fn with_state(mut self, state: ItemState) -> Self {
        self.state = state;
        self
    }

    pub fn with_parts(mut self, part_count: u32) -> Self {
        self.part_count = part_count.max(1);
        self
    }
}

/// A successful enumeration: the collection's reported title (its canonical
/// directory name) and its items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub title: String,
    pub items: Vec<RemoteItem>,
}

impl Listing {
    pub fn new(title: impl Into<String>, items: Vec<RemoteItem>) -> Self {
        Self {
            title: title.into(),
            items,
        }
    }
}

/// Outcome of asking the remote for a collection's contents.
///
/// `Throttled` is the adapter's way of saying "the platform refused to
/// answer in a way that looks like rate limiting". It is distinct from an
/// empty listing, which may or may not be throttling in disguise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enumeration {
    Listed(Listing),
    Throttled,
}

impl Enumeration {
    /// Drops everything from the first already-known URL onwards.
    ///
    /// Incremental listings assume newest-first order: once a known item
    /// shows up, everything after it is known too.
    pub fn take_until_known(self, known: &HashSet<String>) -> Self {
        match self {
            Self::Listed(Listing { title, items }) => Self::Listed(Listing {
                title,
                items: items.into_iter().take_while(|item| !known.contains(&item.url)).collect(),
            }),
            Self::Throttled => Self::Throttled,
        }
    }

    /// Number of listed items, `None` when throttled.
    pub fn item_count(&self) -> Option<usize> {
        match self {
            Self::Listed(listing) => Some(listing.items.len()),
            Self::Throttled => None,
        }
    }
}

/// Full metadata for a placeholder item.
///
/// Empty strings (and an empty `path`) mean "not known"; the manifest keeps
/// whatever it had for those.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedItem {
    pub title: String,
    pub name: String,
    /// Output location relative to the collection, `<id>-<title>` by default.
    pub path: PathBuf,
    pub container_id: String,
    pub content_id: Option<String>,
    pub pubdate: i64,
    pub part_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(urls: &[&str]) -> Enumeration {
        Enumeration::Listed(Listing::new(
            "favorites-1-Test",
            urls.iter().map(|url| RemoteItem::new(*url, *url)).collect(),
        ))
    }

    #[test]
    fn test_take_until_known() {
        let known: HashSet<String> = ["A".to_string(), "B".to_string()].into();
        assert_eq!(listing(&["C", "B", "A"]).take_until_known(&known), listing(&["C"]));
        assert_eq!(listing(&["A", "C"]).take_until_known(&known), listing(&[]));
        assert_eq!(listing(&["D", "C"]).take_until_known(&known), listing(&["D", "C"]));
        assert_eq!(Enumeration::Throttled.take_until_known(&known), Enumeration::Throttled);
    }
}
