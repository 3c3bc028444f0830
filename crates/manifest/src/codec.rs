//! CSV encoding of manifest snapshots.
//!
//! ```text
//! <BOM># Original URL: https://example.com/collection
//! item_url,title,name,download_path,downloaded,container_id,content_id,pubdate,status,multi_part,total_parts,folder_size
//! https://example.com/v/1,First,First,First,True,av1,1001,2023-11-14 22:13:20,normal,False,1,1048576
//! ```
//!
//! Reading is forgiving about *rows* (bad values degrade with a warning) and
//! strict about *structure* (a missing required column fails the whole load).

use crate::encoding::UTF8_BOM;
use crate::error::{ErrorKind, Result};
use crate::models::{ManifestItem, Status};
use crate::path::{sanitize_component, validate as validate_path};
use crate::pubdate;
use exn::ResultExt;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

const ORIGIN_PREFIX: &str = "# Original URL:";
const DEFAULT_TITLE: &str = "Untitled";

pub(crate) const HEADERS: [&str; 12] = [
    "item_url",
    "title",
    "name",
    "download_path",
    "downloaded",
    "container_id",
    "content_id",
    "pubdate",
    "status",
    "multi_part",
    "total_parts",
    "folder_size",
];
const REQUIRED: [&str; 3] = ["item_url", "title", "downloaded"];

/// Maps column names found in older manifests onto current ones.
fn canonical_column(name: &str) -> &str {
    match name {
        "video_url" => "item_url",
        "avid" => "container_id",
        "cid" => "content_id",
        "is_multi_part" => "multi_part",
        other => other,
    }
}

#[derive(Debug)]
pub(crate) struct Decoded {
    pub origin_url: Option<String>,
    pub items: Vec<ManifestItem>,
}

/// Column lookup for one row. Missing optional columns read as empty.
struct Row<'a> {
    columns: &'a HashMap<String, usize>,
    record: &'a csv::StringRecord,
}

impl Row<'_> {
    fn get(&self, column: &str) -> &str {
        self.columns.get(column).and_then(|&idx| self.record.get(idx)).map(str::trim).unwrap_or_default()
    }
}

pub(crate) fn decode(text: &str) -> Result<Decoded> {
    // A BOM may survive when the bytes were decoded by the caller.
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut origin_url = None;
    let mut body = text;
    while body.starts_with('#') {
        let (line, rest) = body.split_once('\n').unwrap_or((body, ""));
        if let Some(url) = line.trim_end().strip_prefix(ORIGIN_PREFIX) {
            origin_url = Some(url.trim().to_string()).filter(|url| !url.is_empty());
        }
        body = rest;
    }
    if body.trim().is_empty() {
        return Ok(Decoded {
            origin_url,
            items: Vec::new(),
        });
    }

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(body.as_bytes());
    let headers = reader.headers().or_raise(|| ErrorKind::Malformed("unreadable header".to_string()))?;
    let mut columns = HashMap::new();
    for (idx, name) in headers.iter().enumerate() {
        columns.entry(canonical_column(name.trim()).to_string()).or_insert(idx);
    }
    if let Some(missing) = REQUIRED.iter().find(|column| !columns.contains_key(**column)) {
        exn::bail!(ErrorKind::Malformed(format!("missing required column {missing}")));
    }

    let mut items = Vec::new();
    let mut seen = HashSet::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.or_raise(|| ErrorKind::Malformed(format!("unreadable record {}", line + 1)))?;
        let row = Row {
            columns: &columns,
            record: &record,
        };
        let Some(item) = decode_row(&row, line + 1) else {
            continue;
        };
        if !seen.insert(item.item_url.clone()) {
            tracing::warn!(row = line + 1, item_url = %item.item_url, "Duplicate item URL in manifest; keeping the first");
            continue;
        }
        items.push(item);
    }
    Ok(Decoded { origin_url, items })
}

fn decode_row(row: &Row<'_>, line: usize) -> Option<ManifestItem> {
    let item_url = row.get("item_url");
    if item_url.is_empty() {
        tracing::warn!(row = line, "Manifest row has no item URL; skipping");
        return None;
    }
    let title = match row.get("title") {
        "" => {
            tracing::warn!(row = line, item_url, "Manifest row has no title");
            DEFAULT_TITLE
        },
        title => title,
    };
    let name = match row.get("name") {
        "" => title,
        name => name,
    };
    let downloaded = parse_bool(row.get("downloaded")).unwrap_or_else(|| {
        tracing::warn!(row = line, item_url, value = row.get("downloaded"), "Invalid downloaded flag; assuming false");
        false
    });
    let pubdate = pubdate::parse(row.get("pubdate")).unwrap_or_else(|| {
        tracing::warn!(row = line, item_url, value = row.get("pubdate"), "Unparsable publication date");
        0
    });
    let status = row.get("status").parse::<Status>().unwrap_or_else(|()| {
        tracing::warn!(row = line, item_url, value = row.get("status"), "Unknown status; assuming normal");
        Status::Normal
    });
    let multi_part = match row.get("multi_part") {
        "" => false,
        value => parse_bool(value).unwrap_or_else(|| {
            tracing::warn!(row = line, item_url, value, "Invalid multi-part flag; assuming false");
            false
        }),
    };
    let part_count = match row.get("total_parts").parse::<u32>() {
        Ok(count) if count >= 1 => count,
        _ => 1,
    };
    let folder_size = match row.get("folder_size") {
        "" => None,
        value => value.parse::<u64>().ok(),
    };
    let content_id = match row.get("content_id") {
        "" | "0" => None,
        cid => Some(cid.to_string()),
    };

    Some(ManifestItem {
        item_url: item_url.to_string(),
        title: title.to_string(),
        name: name.to_string(),
        download_path: download_path(row.get("download_path"), name, item_url),
        downloaded,
        container_id: row.get("container_id").to_string(),
        content_id,
        pubdate,
        status,
        multi_part,
        part_count,
        folder_size,
    })
}

/// The recorded path if it stays inside the collection, otherwise one built
/// from the display name.
///
/// Older manifests store absolute paths; only their last component names the
/// item's folder.
fn download_path(recorded: &str, name: &str, item_url: &str) -> PathBuf {
    if is_absolute(recorded) {
        let leaf = recorded.rsplit(['/', '\\']).find_map(sanitize_component);
        if let Some(leaf) = leaf {
            tracing::debug!(item_url, path = recorded, leaf = %leaf, "Keeping the last component of an absolute path");
            return PathBuf::from(leaf);
        }
    }
    if !recorded.is_empty() {
        match validate_path(recorded) {
            Ok(path) => return path,
            Err(_) => tracing::warn!(item_url, path = recorded, "Download path escapes the collection; rebuilding it"),
        }
    }
    PathBuf::from(sanitize_component(name).unwrap_or_else(|| DEFAULT_TITLE.to_string()))
}

/// Absolute on either Unix or Windows, whatever this platform is.
fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    let drive = bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && matches!(bytes[2], b'/' | b'\\');
    path.starts_with(['/', '\\']) || drive
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Booleans are spelled `True`/`False`, as in manifests written by the
/// older tool.
fn bool_text(value: bool) -> &'static str {
    match value {
        true => "True",
        false => "False",
    }
}

pub(crate) fn encode(origin_url: Option<&str>, items: &[ManifestItem]) -> Result<Vec<u8>> {
    let mut out = UTF8_BOM.to_vec();
    if let Some(url) = origin_url {
        out.extend_from_slice(format!("{ORIGIN_PREFIX} {url}\n").as_bytes());
    }
    let mut writer = csv::WriterBuilder::new().terminator(csv::Terminator::Any(b'\n')).from_writer(out);
    writer.write_record(HEADERS).or_raise(|| ErrorKind::Io)?;
    for item in items {
        let download_path = item.download_path.to_string_lossy();
        let pubdate = pubdate::format(item.pubdate);
        let status = item.status.to_string();
        let part_count = item.part_count.max(1).to_string();
        let folder_size = item.folder_size.map(|size| size.to_string()).unwrap_or_default();
        writer
            .write_record([
                item.item_url.as_str(),
                item.title.as_str(),
                item.name.as_str(),
                download_path.as_ref(),
                bool_text(item.downloaded),
                item.container_id.as_str(),
                item.content_id.as_deref().unwrap_or_default(),
                pubdate.as_str(),
                status.as_str(),
                bool_text(item.multi_part),
                part_count.as_str(),
                folder_size.as_str(),
            ])
            .or_raise(|| ErrorKind::Io)?;
    }
    writer.into_inner().map_err(|err| err.into_error()).or_raise(|| ErrorKind::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn item(url: &str, title: &str) -> ManifestItem {
        ManifestItem::new(url, title, title)
    }

    #[test]
    fn test_encode_layout() {
        let mut first = item("https://example.com/v/1", "First, with comma");
        first.downloaded = true;
        first.folder_size = Some(42);
        let bytes = encode(Some("https://example.com/c/1"), &[first]).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("# Original URL: https://example.com/c/1"));
        assert_eq!(lines.next(), Some(HEADERS.join(",").as_str()));
        assert_eq!(
            lines.next(),
            Some(
                r#"https://example.com/v/1,"First, with comma","First, with comma","First, with comma",True,,,unknown,normal,False,1,42"#
            )
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_decode_what_was_encoded() {
        let mut pending = item("https://example.com/v/2", "Second");
        pending.status = Status::Pending;
        pending.content_id = Some("2002".into());
        pending.pubdate = 1_700_000_000;
        let mut multi = item("https://example.com/v/3", "Third").with_parts(4);
        multi.downloaded = true;
        let items = vec![item("https://example.com/v/1", "First"), pending, multi];

        let bytes = encode(Some("https://example.com/c/1"), &items).unwrap();
        let decoded = decode(&String::from_utf8(bytes).unwrap()).unwrap();
        assert_eq!(decoded.origin_url.as_deref(), Some("https://example.com/c/1"));
        assert_eq!(decoded.items, items);
    }

    #[test]
    fn test_legacy_columns_and_extra_columns() {
        let text = "# Original URL: https://example.com/fav\n\
                    video_url,title,name,download_path,downloaded,avid,cid,pubdate,status,is_multi_part,total_parts,uploader\n\
                    https://example.com/v/1,One,One,One,True,av1,0,1700000000,ready,False,1,someone\n";
        let decoded = decode(text).unwrap();
        assert_eq!(decoded.items.len(), 1);
        let one = &decoded.items[0];
        assert_eq!(one.item_url, "https://example.com/v/1");
        assert!(one.downloaded);
        assert_eq!(one.container_id, "av1");
        assert_eq!(one.content_id, None);
        assert_eq!(one.pubdate, 1_700_000_000);
        assert_eq!(one.status, Status::Normal);
    }

    #[test]
    fn test_rows_degrade_instead_of_failing() {
        let text = "item_url,title,downloaded,pubdate,multi_part,total_parts,download_path\n\
                    ,Nameless,false,,,,\n\
                    https://example.com/v/1,,maybe,yesterday,perhaps,0,../../etc\n\
                    https://example.com/v/1,Duplicate,true,,,,\n";
        let decoded = decode(text).unwrap();
        assert_eq!(decoded.origin_url, None);
        assert_eq!(decoded.items.len(), 1);
        let one = &decoded.items[0];
        assert_eq!(one.title, DEFAULT_TITLE);
        assert!(!one.downloaded);
        assert_eq!(one.pubdate, 0);
        assert!(!one.multi_part);
        assert_eq!(one.part_count, 1);
        assert_eq!(one.download_path, PathBuf::from(DEFAULT_TITLE));
    }

    #[rstest]
    #[case("/home/user/mirror/favorites-1-Music/BV1a-Song", "BV1a-Song")]
    #[case("/home/user/mirror/favorites-1-Music/BV1a-Song/", "BV1a-Song")]
    #[case(r"D:\mirror\favorites-1-Music\BV1a-Song", "BV1a-Song")]
    #[case("BV1a-Song/part 1", "BV1a-Song/part 1")]
    #[case("/", "One")]
    fn test_legacy_absolute_paths(#[case] recorded: &str, #[case] expected: &str) {
        let text = format!("video_url,title,name,download_path,downloaded\nhttps://example.com/v/1,One,One,\"{recorded}\",False\n");
        let decoded = decode(&text).unwrap();
        assert_eq!(decoded.items[0].download_path, PathBuf::from(expected));
    }

    #[test]
    fn test_missing_required_column_is_structural() {
        let err = decode("item_url,title\nhttps://example.com/v/1,One\n").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Malformed(msg) if msg.contains("downloaded")));
    }

    #[test]
    fn test_empty_bodies() {
        assert!(decode("").unwrap().items.is_empty());
        let header_only = decode("# Original URL: https://example.com/c\nitem_url,title,downloaded\n").unwrap();
        assert_eq!(header_only.origin_url.as_deref(), Some("https://example.com/c"));
        assert!(header_only.items.is_empty());
    }
}
