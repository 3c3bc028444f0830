use super::RemoteSource;
use crate::error::{ErrorKind, Result};
use crate::kind::CollectionKind;
use crate::models::{Enumeration, ItemState, Listing, RemoteItem, ResolvedItem};
use async_trait::async_trait;
use exn::ResultExt;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::instrument;
use vidsync_manifest::path::sanitize_component;

/// Substituted with the collection or item URL in argument templates.
pub const URL_PLACEHOLDER: &str = "{url}";

const THROTTLE_MARKERS: &[&str] = &[
    "http error 412",
    "precondition failed",
    "-352",
    "http error 429",
    "too many requests",
];
const UNAVAILABLE_MARKERS: &[&str] = &[
    "private video",
    "video unavailable",
    "does not exist",
    "has been deleted",
    "http error 404",
    "稿件不可见",
    "视频不存在",
    "已删除",
];
const UNTITLED: &str = "Untitled";

/// Enumerates collections by running an external lister program that prints
/// a JSON document on stdout:
///
/// ```json
/// { "id": "1306978874", "title": "Music",
///   "entries": [ { "url": "https://...", "title": "...", "name": "...", "path": "...",
///                  "id": "BV1...", "cid": 77, "pubdate": 1700000000,
///                  "status": "pending", "parts": 1 } ] }
/// ```
///
/// Every entry field but `url` is optional. `status` is one of `normal`
/// (also `ready`), `pending` or `unavailable`; `path` defaults to
/// `<id>-<title>`. The `yt-dlp -J` spellings are read too (`webpage_url`,
/// `timestamp`, `availability`, and `"_type": "url"` for placeholders), so
/// `yt-dlp --flat-playlist -J` works as a lister. A document without
/// `entries` describes a single item.
pub struct CommandSource {
    name: String,
    program: PathBuf,
    list_args: Vec<String>,
    resolve_args: Vec<String>,
    timeout: Duration,
}

impl CommandSource {
    pub const DEFAULT_PROGRAM: &str = "yt-dlp";

    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        Self {
            name: program.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "command".to_string()),
            program,
            list_args: ["--flat-playlist", "-J", URL_PLACEHOLDER].map(String::from).to_vec(),
            resolve_args: ["-J", URL_PLACEHOLDER].map(String::from).to_vec(),
            timeout: Duration::from_secs(300),
        }
    }

    /// Finds `program` on `PATH`.
    pub fn discover(program: &str) -> Result<Self> {
        match which::which(program) {
            Ok(path) => Ok(Self::new(path)),
            Err(_) => {
                tracing::info!(program, "Lister program not found in PATH");
                exn::bail!(ErrorKind::ToolNotFound(program.to_string()))
            },
        }
    }

    pub fn with_list_args(mut self, args: Vec<String>) -> Self {
        self.list_args = args;
        self
    }

    pub fn with_resolve_args(mut self, args: Vec<String>) -> Self {
        self.resolve_args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, template: &[String], url: &str) -> Result<Output> {
        let mut command = Command::new(&self.program);
        command
            .args(template.iter().map(|arg| arg.replace(URL_PLACEHOLDER, url)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_elapsed) => exn::bail!(ErrorKind::Network(format!("lister timed out after {:?}", self.timeout))),
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                exn::bail!(ErrorKind::ToolNotFound(self.program.display().to_string()))
            },
            Ok(result) => result.or_raise(|| ErrorKind::Network("could not run lister".to_string())),
        }
    }
}

/// What a failed lister run means.
#[derive(Debug, PartialEq, Eq)]
enum Failure {
    Throttled,
    Unavailable(String),
    Other(String),
}

fn classify_failure(stderr: &[u8]) -> Failure {
    let text = String::from_utf8_lossy(stderr);
    let lowered = text.to_lowercase();
    let last_line = text.lines().rev().find(|line| !line.trim().is_empty()).unwrap_or("no output").trim().to_string();
    if THROTTLE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        Failure::Throttled
    } else if UNAVAILABLE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        Failure::Unavailable(last_line)
    } else {
        Failure::Other(last_line)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Id {
    Text(String),
    Number(i64),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawEntry {
    #[serde(default, rename = "_type")]
    kind: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    id: Option<Id>,
    #[serde(default)]
    cid: Option<Id>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default, alias = "timestamp")]
    pubdate: Option<f64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    availability: Option<String>,
    #[serde(default)]
    parts: Option<u32>,
    #[serde(default)]
    entries: Option<Vec<RawEntry>>,
}

impl RawEntry {
    fn title(&self) -> &str {
        self.title.as_deref().map(str::trim).filter(|t| !t.is_empty()).unwrap_or(UNTITLED)
    }

    fn id(&self) -> String {
        self.id.as_ref().map(Id::to_string).unwrap_or_default()
    }

    fn name(&self) -> String {
        self.name
            .as_deref()
            .and_then(sanitize_component)
            .or_else(|| sanitize_component(self.title()))
            .unwrap_or_else(|| UNTITLED.to_string())
    }

    /// The listed path, else `<id>-<title>`.
    fn path(&self) -> PathBuf {
        if let Some(path) = self.path.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        let id = self.id();
        let leaf = match sanitize_component(self.title()) {
            Some(clean) if !id.is_empty() => format!("{id}-{clean}"),
            Some(clean) => clean,
            None if !id.is_empty() => id,
            None => UNTITLED.to_string(),
        };
        PathBuf::from(leaf)
    }

    fn pubdate(&self) -> i64 {
        self.pubdate.filter(|ts| ts.is_finite() && *ts > 0.0).map(|ts| ts as i64).unwrap_or(0)
    }

    fn part_count(&self) -> u32 {
        self.parts
            .or_else(|| self.entries.as_ref().map(|e| u32::try_from(e.len()).unwrap_or(u32::MAX)))
            .unwrap_or(1)
            .max(1)
    }

    fn state(&self) -> ItemState {
        match self.status.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("pending") => return ItemState::Placeholder,
            Some("unavailable") => return ItemState::Unavailable,
            Some("normal" | "ready") => return ItemState::Ready,
            _ => {},
        }
        let title = self.title();
        if matches!(self.availability.as_deref(), Some("private"))
            || title.eq_ignore_ascii_case("[deleted video]")
            || title.eq_ignore_ascii_case("[private video]")
        {
            ItemState::Unavailable
        } else if self.kind.as_deref() == Some("url") {
            ItemState::Placeholder
        } else {
            ItemState::Ready
        }
    }

    fn into_item(self) -> Option<RemoteItem> {
        let url = self.webpage_url.clone().or_else(|| self.url.clone()).filter(|u| !u.trim().is_empty())?;
        Some(RemoteItem {
            url,
            name: self.name(),
            path: self.path(),
            state: self.state(),
            title: self.title().to_string(),
            container_id: self.id(),
            content_id: self.cid.as_ref().map(Id::to_string),
            pubdate: self.pubdate(),
            part_count: self.part_count(),
        })
    }

    fn into_resolved(self) -> ResolvedItem {
        ResolvedItem {
            name: self.name(),
            path: self.path(),
            title: self.title().to_string(),
            container_id: self.id(),
            content_id: self.cid.as_ref().map(Id::to_string),
            pubdate: self.pubdate(),
            part_count: self.part_count(),
        }
    }
}

fn parse_listing(kind: CollectionKind, url: &str, stdout: &[u8]) -> Result<Listing> {
    let mut raw: RawEntry = serde_json::from_slice(stdout).or_raise(|| ErrorKind::Malformed(url.to_string()))?;
    let title = kind.folder_name(
        &raw.id(),
        &sanitize_component(raw.title()).unwrap_or_else(|| UNTITLED.to_string()),
    );
    let entries = match raw.entries.take() {
        Some(entries) => entries,
        None => vec![RawEntry {
            webpage_url: raw.webpage_url.clone().or_else(|| Some(url.to_string())),
            ..raw
        }],
    };
    let total = entries.len();
    let items: Vec<_> = entries.into_iter().filter_map(RawEntry::into_item).collect();
    if items.len() < total {
        tracing::warn!(url, skipped = total - items.len(), "Lister returned entries without a URL");
    }
    Ok(Listing { title, items })
}

/// A document with its own id or title describes the item itself (its
/// `entries` are parts); otherwise the first entry is the item.
fn parse_resolved(url: &str, stdout: &[u8]) -> Result<ResolvedItem> {
    let mut raw: RawEntry = serde_json::from_slice(stdout).or_raise(|| ErrorKind::Malformed(url.to_string()))?;
    if raw.id.is_none() && raw.title.is_none() {
        match raw.entries.take().and_then(|entries| entries.into_iter().next()) {
            Some(first) => return Ok(first.into_resolved()),
            None => exn::bail!(ErrorKind::Malformed(url.to_string())),
        }
    }
    Ok(raw.into_resolved())
}

#[async_trait]
impl RemoteSource for CommandSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(source = %self.name))]
    async fn enumerate(&self, url: &str) -> Result<Enumeration> {
        let Some(kind) = CollectionKind::from_url(url) else {
            exn::bail!(ErrorKind::Unsupported(url.to_string()));
        };
        let output = self.run(&self.list_args, url).await?;
        if !output.status.success() {
            match classify_failure(&output.stderr) {
                Failure::Throttled => {
                    tracing::warn!(url, "Lister output looks like rate limiting");
                    return Ok(Enumeration::Throttled);
                },
                Failure::Unavailable(reason) => exn::bail!(ErrorKind::Unavailable(reason)),
                Failure::Other(reason) => exn::bail!(ErrorKind::Network(reason)),
            }
        }
        parse_listing(kind, url, &output.stdout).map(Enumeration::Listed)
    }

    #[instrument(skip(self), fields(source = %self.name))]
    async fn resolve_item(&self, item_url: &str) -> Result<ResolvedItem> {
        let output = self.run(&self.resolve_args, item_url).await?;
        if !output.status.success() {
            match classify_failure(&output.stderr) {
                Failure::Throttled => exn::bail!(ErrorKind::Network("rate limited while resolving".to_string())),
                Failure::Unavailable(reason) => exn::bail!(ErrorKind::Unavailable(reason)),
                Failure::Other(reason) => exn::bail!(ErrorKind::Network(reason)),
            }
        }
        parse_resolved(item_url, &output.stdout)
    }
}
