//! Lenient timestamp parsing for upstream payloads.
//!
//! Upstreams mostly send RFC 3339, but some omit the offset. A timestamp
//! without an offset is read as UTC.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Deserializer, de};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

pub(crate) fn parse_instant(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed);
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc().fixed_offset())
}

pub(crate) fn instant<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_instant(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp {raw:?}")))
}

pub(crate) fn optional_instant<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_instant(&raw)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp {raw:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn keeps_explicit_offsets() {
        let parsed = parse_instant("2024-09-24T19:00:00.000+03:00").unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), 3 * 3600);
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 9, 24, 16, 0, 0).unwrap());
    }

    #[test]
    fn naive_timestamps_are_utc() {
        let parsed = parse_instant("2024-09-24T16:00:00").unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), 0);
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 9, 24, 16, 0, 0).unwrap());
        assert!(parse_instant("2024-09-24 16:00:00").is_some());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_instant("tomorrow").is_none());
        assert!(parse_instant("").is_none());
    }
}
