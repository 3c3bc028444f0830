use std::collections::VecDeque;
use time::UtcDateTime;
use vidsync_source::CollectionKind;

/// A collection URL that recently enumerated healthily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeEntry {
    pub url: String,
    pub kind: Option<CollectionKind>,
    pub added: UtcDateTime,
}

/// Bounded FIFO of known-good URLs, used to tell "this collection is empty"
/// apart from "the platform stopped answering".
#[derive(Debug, Clone)]
pub struct ProbePool {
    capacity: usize,
    entries: VecDeque<ProbeEntry>,
}

impl ProbePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Adds `url` unless it is already pooled, evicting the oldest entry
    /// when full. Returns whether the URL was added.
    pub fn insert(&mut self, url: &str, kind: Option<CollectionKind>) -> bool {
        if self.contains(url) {
            return false;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ProbeEntry {
            url: url.to_string(),
            kind,
            added: UtcDateTime::now(),
        });
        true
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.iter().any(|entry| entry.url == url)
    }

    /// Up to `n` URLs to probe, most recently added first.
    pub fn candidates(&self, n: usize) -> Vec<ProbeEntry> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ProbeEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(pool: &ProbePool) -> Vec<&str> {
        pool.entries().map(|entry| entry.url.as_str()).collect()
    }

    #[test]
    fn test_bounded_fifo() {
        let mut pool = ProbePool::new(3);
        for url in ["a", "b", "c", "d"] {
            assert!(pool.insert(url, None));
        }
        assert_eq!(urls(&pool), ["b", "c", "d"]);
    }

    #[test]
    fn test_deduplicated() {
        let mut pool = ProbePool::new(3);
        assert!(pool.insert("a", Some(CollectionKind::Favorites)));
        assert!(pool.insert("b", None));
        assert!(!pool.insert("a", None));
        assert_eq!(urls(&pool), ["a", "b"]);
        assert_eq!(pool.entries().next().unwrap().kind, Some(CollectionKind::Favorites));
    }

    #[test]
    fn test_candidates_newest_first() {
        let mut pool = ProbePool::new(10);
        for url in ["a", "b", "c", "d"] {
            pool.insert(url, None);
        }
        let candidates: Vec<_> = pool.candidates(3).into_iter().map(|entry| entry.url).collect();
        assert_eq!(candidates, ["d", "c", "b"]);
        assert_eq!(pool.candidates(10).len(), 4);
    }
}
