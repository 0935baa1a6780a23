//! Free-text timestamp normalization to UTC

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

const ZONED_FORMATS: &[&str] = &[
    "%A, %B %d, %Y %I:%M:%S %p %:z",
    "%B %d, %Y %I:%M:%S %p %:z",
    "%Y-%m-%d %H:%M:%S %:z",
    "%Y-%m-%d %H:%M:%S%z",
    "%d.%m.%Y %H:%M:%S %:z",
    "%d.%m.%Y %H:%M %:z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%A, %B %d, %Y %I:%M:%S %p",
    "%B %d, %Y %I:%M:%S %p",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
];

fn gmt_annotation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\(\s*(?:GMT|UTC)\s*([+-]\d{2}:\d{2})?\s*\)").expect("static regex")
    })
}

/// Parse a vendor timestamp and convert it to UTC.
///
/// Parenthesised zone annotations such as `(GMT+03:00)` are folded into a plain offset first.
/// A timestamp without zone information is taken as UTC. Unparseable input yields `None`.
pub fn normalize_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = gmt_annotation_re().replace_all(raw.trim(), |caps: &regex::Captures<'_>| {
        caps.get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "+00:00".to_string())
    });
    let s = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(&s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ZONED_FORMATS {
        if let Ok(dt) = DateTime::<FixedOffset>::parse_from_str(&s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_vendor_gmt_annotation() {
        assert_eq!(
            normalize_timestamp("Tuesday, January 27, 2026 7:14:20 AM (GMT+00:00)"),
            Some(utc("2026-01-27T07:14:20Z"))
        );
        assert_eq!(
            normalize_timestamp("Tuesday, January 27, 2026 10:14:20 AM (GMT+03:00)"),
            Some(utc("2026-01-27T07:14:20Z"))
        );
    }

    #[test]
    fn test_naive_is_utc() {
        assert_eq!(
            normalize_timestamp("27.01.2026 10:14:20"),
            Some(utc("2026-01-27T10:14:20Z"))
        );
        assert_eq!(
            normalize_timestamp("2026-01-27 10:14:20"),
            Some(utc("2026-01-27T10:14:20Z"))
        );
    }

    #[test]
    fn test_offsets_are_converted() {
        assert_eq!(
            normalize_timestamp("2026-01-27T10:14:20+03:00"),
            Some(utc("2026-01-27T07:14:20Z"))
        );
        assert_eq!(
            normalize_timestamp("Tue, 27 Jan 2026 10:14:20 +0300"),
            Some(utc("2026-01-27T07:14:20Z"))
        );
    }

    #[test]
    fn test_garbage_is_none() {
        assert_eq!(normalize_timestamp(""), None);
        assert_eq!(normalize_timestamp("yesterday-ish"), None);
    }
}
