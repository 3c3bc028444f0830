use derive_more::Display;
use regex::Regex;
use std::sync::LazyLock;

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

regex!(UPLOAD_AV, r"^https?://(www\.)?bilibili\.com/video/av(\d+)/?");
regex!(UPLOAD_BV, r"^https?://(www\.)?bilibili\.com/video/([bB][vV]\w+)/?");
regex!(BANGUMI, r"^https?://(www\.)?bilibili\.com/bangumi/(media/md|play/ep|play/ss)(\d+)");
regex!(FAVORITES, r"^https?://space\.bilibili\.com/(\d+)/favlist\?fid=(\d+)((&ftype=create)|$)");
regex!(SERIES, r"^https?://space\.bilibili\.com/(\d+)/lists/(\d+)\?type=series");
regex!(SEASON, r"^https?://space\.bilibili\.com/(\d+)/lists/(\d+)\?type=season");
regex!(CHANNEL, r"^https?://space\.bilibili\.com/(\d+)(/video)?/?(\?.*)?$");
regex!(WATCH_LATER, r"^https?://(www\.)?bilibili\.com/(watchlater|list/watchlater)");
regex!(COURSE, r"^https?://(www\.)?bilibili\.com/cheese/play/(ep|ss)(\d+)");

/// The closed set of collection shapes the engine understands.
///
/// The kind decides the directory prefix, whether the transfer tool needs
/// batch mode, and whether enumeration can stop early at known items.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// A single (possibly multi-part) upload.
    #[display("upload")]
    Upload,
    #[display("bangumi")]
    Bangumi,
    /// A paid course.
    #[display("course")]
    Course,
    #[display("favorites")]
    Favorites,
    #[display("series")]
    Series,
    #[display("season")]
    Season,
    /// Everything a single user has uploaded.
    #[display("channel")]
    Channel,
    #[display("watchlater")]
    WatchLater,
}

impl CollectionKind {
    pub const ALL: [Self; 8] = [
        Self::Upload,
        Self::Bangumi,
        Self::Course,
        Self::Favorites,
        Self::Series,
        Self::Season,
        Self::Channel,
        Self::WatchLater,
    ];

    /// Directory-name prefix; also the collection's display name in logs.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Bangumi => "bangumi",
            Self::Course => "course",
            Self::Favorites => "favorites",
            Self::Series => "series",
            Self::Season => "season",
            Self::Channel => "channel",
            Self::WatchLater => "watchlater",
        }
    }

    /// Matches a URL against each kind's pattern, in order. First match wins:
    /// favourite folders live under a user's space, so they must be tried
    /// before the catch-all channel pattern.
    pub fn from_url(url: &str) -> Option<Self> {
        let table: [(&LazyLock<Regex>, Self); 9] = [
            (&UPLOAD_AV, Self::Upload),
            (&UPLOAD_BV, Self::Upload),
            (&BANGUMI, Self::Bangumi),
            (&FAVORITES, Self::Favorites),
            (&SERIES, Self::Series),
            (&SEASON, Self::Season),
            (&CHANNEL, Self::Channel),
            (&WATCH_LATER, Self::WatchLater),
            (&COURSE, Self::Course),
        ];
        let url = url.trim();
        table.into_iter().find(|(regex, _)| regex.is_match(url)).map(|(_, kind)| kind)
    }

    /// Recognises a collection directory by its `<prefix>-` name.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| {
            name.strip_prefix(kind.prefix()).is_some_and(|rest| rest.starts_with('-') && rest.len() > 1)
        })
    }

    /// Builds the canonical `<prefix>-<id>-<name>` directory name.
    pub fn folder_name(&self, id: &str, name: &str) -> String {
        format!("{}-{}-{}", self.prefix(), id, name)
    }

    /// Collections listed newest-first, where enumeration can stop at the
    /// first already-known item.
    pub fn supports_incremental(&self) -> bool {
        matches!(self, Self::Favorites | Self::Channel)
    }

    /// Whether the transfer tool must run in batch mode (every part or
    /// episode behind one URL).
    pub fn needs_batch(&self) -> bool {
        matches!(self, Self::Course)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://www.bilibili.com/video/av170001", Some(CollectionKind::Upload))]
    #[case("https://www.bilibili.com/video/BV1xx411c7mD/", Some(CollectionKind::Upload))]
    #[case("https://www.bilibili.com/bangumi/media/md28223043", Some(CollectionKind::Bangumi))]
    #[case("https://www.bilibili.com/bangumi/play/ep374717", Some(CollectionKind::Bangumi))]
    #[case("https://www.bilibili.com/bangumi/play/ss33343", Some(CollectionKind::Bangumi))]
    #[case("https://space.bilibili.com/100969474/favlist?fid=1306978874", Some(CollectionKind::Favorites))]
    #[case(
        "https://space.bilibili.com/100969474/favlist?fid=1306978874&ftype=create",
        Some(CollectionKind::Favorites)
    )]
    #[case("https://space.bilibili.com/1/lists/2?type=series", Some(CollectionKind::Series))]
    #[case("https://space.bilibili.com/1/lists/2?type=season", Some(CollectionKind::Season))]
    #[case("https://space.bilibili.com/100969474", Some(CollectionKind::Channel))]
    #[case("https://space.bilibili.com/100969474/video", Some(CollectionKind::Channel))]
    #[case("https://space.bilibili.com/100969474/video?tid=0", Some(CollectionKind::Channel))]
    #[case("https://www.bilibili.com/watchlater", Some(CollectionKind::WatchLater))]
    #[case("https://www.bilibili.com/list/watchlater", Some(CollectionKind::WatchLater))]
    #[case("https://www.bilibili.com/cheese/play/ep6902", Some(CollectionKind::Course))]
    #[case("https://www.bilibili.com/cheese/play/ss360", Some(CollectionKind::Course))]
    #[case("https://example.com/video/av1", None)]
    #[case("not a url", None)]
    fn test_from_url(#[case] url: &str, #[case] expected: Option<CollectionKind>) {
        assert_eq!(CollectionKind::from_url(url), expected);
    }

    #[rstest]
    #[case("favorites-1306978874-Music", Some(CollectionKind::Favorites))]
    #[case("channel-100969474-Someone", Some(CollectionKind::Channel))]
    #[case("watchlater-watchlater-Watch Later", Some(CollectionKind::WatchLater))]
    #[case("invalid-empty-favorites-1-Music", None)]
    #[case("favoritesX-1-Music", None)]
    #[case("favorites-", None)]
    #[case("random folder", None)]
    fn test_from_dir_name(#[case] name: &str, #[case] expected: Option<CollectionKind>) {
        assert_eq!(CollectionKind::from_dir_name(name), expected);
    }

    #[test]
    fn test_folder_name_round_trip() {
        for kind in CollectionKind::ALL {
            let name = kind.folder_name("42", "Something");
            assert_eq!(CollectionKind::from_dir_name(&name), Some(kind));
        }
    }
}
