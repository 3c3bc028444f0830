//! Download path validation.
//!
//! Every `download_path` in a manifest is relative to its collection
//! directory. Cleanup before a transfer deletes whatever that path points at,
//! so a manifest (hand-edited, or written by an older tool) must never be able
//! to point outside the collection.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Characters that are either path separators or rejected by at least one
/// common filesystem.
const RESERVED: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

/// Validates a download path, returning it normalized.
///
/// `..` components are resolved lexically; any path that would climb out of
/// the collection directory, is absolute-with-prefix, contains a NUL byte or
/// normalizes to nothing is rejected with
/// [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use vidsync_manifest::validate_path;
/// assert!(validate_path("My Video").is_ok());
/// assert!(validate_path("season 1/ep 2").is_ok());
/// assert!(validate_path("../outside").is_err());
/// assert_eq!(validate_path("a/../b//./c/").unwrap(), Path::new("b/c"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let invalid = || ErrorKind::InvalidPath(path.as_ref().to_path_buf());
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // NUL survives Path::components() on Unix but truncates in syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(invalid());
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(invalid()),
        false => Ok(components.into_iter().collect()),
    }
}

/// Turns an arbitrary title into a single path component.
///
/// Reserved characters become `_`, surrounding whitespace and dots are
/// trimmed. Returns `None` when nothing usable is left.
pub fn sanitize_component(name: &str) -> Option<String> {
    let replaced: String = name.chars().map(|c| if RESERVED.contains(&c) || c.is_control() { '_' } else { c }).collect();
    let trimmed = replaced.trim().trim_matches('.').trim();
    match trimmed.is_empty() {
        true => None,
        false => Some(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Video Title", "Video Title")]
    #[case("season/episode", "season/episode")]
    #[case("a//b//c", "a/b/c")]
    #[case("a/./b/./c", "a/b/c")]
    #[case("a/b/..", "a")]
    #[case("/rooted/path", "rooted/path")]
    #[case("trailing/", "trailing")]
    fn test_valid_paths(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate(input).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case("../etc/passwd")]
    #[case("a/../../b")]
    #[case("..")]
    #[case("")]
    #[case(".")]
    #[case("./.")]
    #[case("//")]
    #[case("a\0b")]
    fn test_invalid_paths(#[case] input: &str) {
        let err = validate(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[rstest]
    #[case("Plain", Some("Plain"))]
    #[case("a/b\\c", Some("a_b_c"))]
    #[case("what?: <yes>", Some("what__ _yes_"))]
    #[case("  ..hidden..  ", Some("hidden"))]
    #[case("...", None)]
    #[case("   ", None)]
    fn test_sanitize_component(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(sanitize_component(input).as_deref(), expected);
    }
}
