use derive_more::Display;
use regex::Regex;
use std::sync::LazyLock;
use time::OffsetDateTime;

static SNAPSHOT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2}-\d{2}-\d{2}-\d{2}-\d{2})\.csv$").unwrap());

/// Name of a manifest snapshot: a `yy-mm-dd-hh-mm` timestamp.
///
/// Every component is zero-padded, so lexicographic order is chronological
/// order (for the 2000s, anyway) and the highest generation in a directory is
/// the authoritative one. Temporary files (`temp_*.csv`) never parse as a
/// generation and are therefore invisible to loading.
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("{_0}")]
pub struct Generation(String);

impl Generation {
    pub fn from_file_name(name: &str) -> Option<Self> {
        SNAPSHOT_NAME.captures(name).map(|caps| Self(caps[1].to_string()))
    }

    pub fn file_name(&self) -> String {
        format!("{}.csv", self.0)
    }

    /// Generation for the current local minute.
    pub fn now() -> Self {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        Self(format!(
            "{:02}-{:02}-{:02}-{:02}-{:02}",
            now.year().rem_euclid(100),
            u8::from(now.month()),
            now.day(),
            now.hour(),
            now.minute(),
        ))
    }

    /// Generation to write after `previous`. Never goes backwards: a clock
    /// that jumped back reuses (and atomically replaces) the previous name.
    pub fn after(previous: Option<&Generation>) -> Self {
        let now = Self::now();
        match previous {
            Some(previous) if *previous > now => previous.clone(),
            _ => now,
        }
    }
}
