//! Publication timestamps as they appear in manifests.
//!
//! Manifests are meant to be readable in a spreadsheet, so dates are written
//! as local wall-clock time rather than raw epochs. Reading accepts both.

use std::sync::LazyLock;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

const FORMAT: &[BorrowedFormatItem<'_>] = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Written for a zero (unknown) timestamp.
pub const UNKNOWN: &str = "unknown";
/// What older manifests wrote for an unknown timestamp.
const LEGACY_UNKNOWN: &str = "未知";

// Resolved once: the local offset can't be queried safely once other threads exist.
static LOCAL_OFFSET: LazyLock<UtcOffset> = LazyLock::new(|| UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC));

pub fn local_offset() -> UtcOffset {
    *LOCAL_OFFSET
}

pub fn format(epoch: i64) -> String {
    format_with(epoch, local_offset())
}

pub fn format_with(epoch: i64, offset: UtcOffset) -> String {
    if epoch <= 0 {
        return UNKNOWN.to_string();
    }
    OffsetDateTime::from_unix_timestamp(epoch)
        .ok()
        .and_then(|dt| dt.checked_to_offset(offset))
        .and_then(|dt| dt.format(FORMAT).ok())
        .unwrap_or_else(|| epoch.to_string())
}

/// Parses a manifest date; `None` means the value is garbage and the caller
/// should degrade it to unknown.
pub fn parse(value: &str) -> Option<i64> {
    parse_with(value, local_offset())
}

pub fn parse_with(value: &str, offset: UtcOffset) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case(UNKNOWN) || value == LEGACY_UNKNOWN {
        return Some(0);
    }
    if value.bytes().all(|b| b.is_ascii_digit()) {
        return value.parse().ok();
    }
    PrimitiveDateTime::parse(value, FORMAT).ok().map(|dt| dt.assume_offset(offset).unix_timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::offset;

    #[rstest]
    #[case(offset!(UTC), "2023-11-14 22:13:20")]
    #[case(offset!(+8), "2023-11-15 06:13:20")]
    #[case(offset!(-5), "2023-11-14 17:13:20")]
    fn test_round_trip(#[case] offset: UtcOffset, #[case] expected: &str) {
        let written = format_with(1_700_000_000, offset);
        assert_eq!(written, expected);
        assert_eq!(parse_with(&written, offset), Some(1_700_000_000));
    }

    #[test]
    fn test_round_trip_local() {
        assert_eq!(parse(&format(1_700_000_000)), Some(1_700_000_000));
    }

    #[rstest]
    #[case("", Some(0))]
    #[case("unknown", Some(0))]
    #[case("未知", Some(0))]
    #[case("1700000000", Some(1_700_000_000))]
    #[case("last tuesday", None)]
    #[case("2023-13-45 99:00:00", None)]
    fn test_parse(#[case] input: &str, #[case] expected: Option<i64>) {
        assert_eq!(parse_with(input, UtcOffset::UTC), expected);
    }

    #[test]
    fn test_unknown_is_written_as_text() {
        assert_eq!(format(0), UNKNOWN);
        assert_eq!(format(-1), UNKNOWN);
    }
}
