//! Week-long query windows.
//!
//! Every calendar request covers exactly one week: Monday 00:00:00 UTC through
//! the following Sunday 23:59:59 UTC. A [`TimeWindow`] can only be obtained
//! through validation, so holding one means the bounds are canonical.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc, Weekday,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A request rejected before any upstream is contacted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A bound fell on the wrong day of the week.
    #[error("{field} must fall on {expected:?}, got {actual:?}")]
    Weekday {
        field: &'static str,
        expected: Weekday,
        actual: Weekday,
    },

    /// A bound was not at the required wall-clock time.
    #[error("{field} must be at {expected}, got {actual}")]
    TimeOfDay {
        field: &'static str,
        expected: &'static str,
        actual: NaiveTime,
    },

    /// A bound carried a non-zero UTC offset.
    #[error("{field} must be UTC, got offset {offset}")]
    NotUtc {
        field: &'static str,
        offset: FixedOffset,
    },

    /// The bounds were individually valid but not one week apart.
    #[error("window must span 6 days 23:59:59, got {seconds} seconds")]
    Span { seconds: i64 },

    /// Any other malformed request field.
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ValidationError {
    /// Creates a free-form validation error for a named field.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// The request field the error refers to, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Weekday { field, .. }
            | Self::TimeOfDay { field, .. }
            | Self::NotUtc { field, .. }
            | Self::Invalid { field, .. } => Some(field),
            Self::Span { .. } => None,
        }
    }
}

/// The exact distance between the two bounds of a valid window.
pub fn week_span() -> Duration {
    Duration::days(7) - Duration::seconds(1)
}

/// A validated Monday-to-Sunday window in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawWindow {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

impl TryFrom<RawWindow> for TimeWindow {
    type Error = ValidationError;

    fn try_from(raw: RawWindow) -> Result<Self, Self::Error> {
        Self::week(raw.start, raw.end)
    }
}

impl TimeWindow {
    /// Validates bounds as received from a client.
    ///
    /// Offsets are checked before anything else: `2024-09-23T03:00:00+03:00`
    /// names the right instant but is still rejected.
    pub fn week(
        time_min: DateTime<FixedOffset>,
        time_max: DateTime<FixedOffset>,
    ) -> Result<Self, ValidationError> {
        let start = require_utc("timeMin", time_min)?;
        let end = require_utc("timeMax", time_max)?;
        Self::from_utc(start, end)
    }

    /// Validates bounds that are already UTC.
    pub fn from_utc(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        require_weekday("timeMin", &start, Weekday::Mon)?;
        require_time("timeMin", &start, (0, 0, 0), "00:00:00")?;
        require_weekday("timeMax", &end, Weekday::Sun)?;
        require_time("timeMax", &end, (23, 59, 59), "23:59:59")?;

        let span = end - start;
        if span != week_span() {
            return Err(ValidationError::Span {
                seconds: span.num_seconds(),
            });
        }

        Ok(Self { start, end })
    }

    /// The window of the week that contains `date`.
    pub fn containing(date: NaiveDate) -> Self {
        let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
        let start = monday.and_time(NaiveTime::MIN).and_utc();
        Self {
            start,
            end: start + week_span(),
        }
    }

    /// Monday 00:00:00 UTC.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Sunday 23:59:59 UTC.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Returns true if `at` lies strictly between the bounds.
    pub fn contains_exclusive(&self, at: DateTime<Utc>) -> bool {
        self.start < at && at < self.end
    }

    /// Returns true if `at` lies within the bounds, bounds included.
    pub fn contains_inclusive(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

fn require_utc(
    field: &'static str,
    at: DateTime<FixedOffset>,
) -> Result<DateTime<Utc>, ValidationError> {
    let offset = *at.offset();
    if offset.local_minus_utc() != 0 {
        return Err(ValidationError::NotUtc { field, offset });
    }
    Ok(at.with_timezone(&Utc))
}

fn require_weekday(
    field: &'static str,
    at: &DateTime<Utc>,
    expected: Weekday,
) -> Result<(), ValidationError> {
    let actual = at.weekday();
    if actual != expected {
        return Err(ValidationError::Weekday {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

fn require_time(
    field: &'static str,
    at: &DateTime<Utc>,
    (hour, minute, second): (u32, u32, u32),
    expected: &'static str,
) -> Result<(), ValidationError> {
    if at.hour() != hour || at.minute() != minute || at.second() != second || at.nanosecond() != 0
    {
        return Err(ValidationError::TimeOfDay {
            field,
            expected,
            actual: at.time(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn parse(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    mod week {
        use super::*;

        #[test]
        fn accepts_canonical_window() {
            let window =
                TimeWindow::week(parse("2024-09-23T00:00:00Z"), parse("2024-09-29T23:59:59Z"))
                    .unwrap();
            assert_eq!(window.start(), utc(2024, 9, 23, 0, 0, 0));
            assert_eq!(window.end(), utc(2024, 9, 29, 23, 59, 59));
            assert_eq!(window.end() - window.start(), week_span());
        }

        #[test]
        fn accepts_explicit_zero_offset() {
            assert!(
                TimeWindow::week(
                    parse("2024-09-23T00:00:00+00:00"),
                    parse("2024-09-29T23:59:59+00:00")
                )
                .is_ok()
            );
        }

        #[test]
        fn rejects_non_utc_offset() {
            let err = TimeWindow::week(
                parse("2024-09-23T03:00:00+03:00"),
                parse("2024-09-29T23:59:59Z"),
            )
            .unwrap_err();
            assert!(matches!(err, ValidationError::NotUtc { field: "timeMin", .. }));
        }

        #[test]
        fn rejects_start_not_monday() {
            let err = TimeWindow::from_utc(utc(2024, 9, 24, 0, 0, 0), utc(2024, 9, 29, 23, 59, 59))
                .unwrap_err();
            assert_eq!(
                err,
                ValidationError::Weekday {
                    field: "timeMin",
                    expected: Weekday::Mon,
                    actual: Weekday::Tue,
                }
            );
        }

        #[test]
        fn rejects_start_not_midnight() {
            let err = TimeWindow::from_utc(utc(2024, 9, 23, 0, 0, 1), utc(2024, 9, 29, 23, 59, 59))
                .unwrap_err();
            assert!(matches!(err, ValidationError::TimeOfDay { field: "timeMin", .. }));
        }

        #[test]
        fn rejects_end_not_sunday() {
            let err = TimeWindow::from_utc(utc(2024, 9, 23, 0, 0, 0), utc(2024, 9, 28, 23, 59, 59))
                .unwrap_err();
            assert!(matches!(
                err,
                ValidationError::Weekday {
                    field: "timeMax",
                    expected: Weekday::Sun,
                    ..
                }
            ));
        }

        #[test]
        fn rejects_end_not_last_second() {
            let err = TimeWindow::from_utc(utc(2024, 9, 23, 0, 0, 0), utc(2024, 9, 29, 23, 59, 0))
                .unwrap_err();
            assert!(matches!(err, ValidationError::TimeOfDay { field: "timeMax", .. }));
        }

        #[test]
        fn rejects_two_week_span() {
            let err = TimeWindow::from_utc(utc(2024, 9, 23, 0, 0, 0), utc(2024, 10, 6, 23, 59, 59))
                .unwrap_err();
            assert_eq!(
                err,
                ValidationError::Span {
                    seconds: 14 * 86_400 - 1
                }
            );
            assert_eq!(err.field(), None);
        }

        #[test]
        fn rejects_reversed_bounds() {
            let err = TimeWindow::from_utc(utc(2024, 9, 30, 0, 0, 0), utc(2024, 9, 29, 23, 59, 59))
                .unwrap_err();
            assert!(matches!(err, ValidationError::Span { seconds: -1 }));
        }
    }

    mod containing {
        use super::*;

        #[test]
        fn midweek_date_maps_to_its_week() {
            let window = TimeWindow::containing(NaiveDate::from_ymd_opt(2024, 9, 26).unwrap());
            assert_eq!(window.start(), utc(2024, 9, 23, 0, 0, 0));
            assert_eq!(window.end(), utc(2024, 9, 29, 23, 59, 59));
        }

        #[test]
        fn sunday_stays_in_same_week() {
            let window = TimeWindow::containing(NaiveDate::from_ymd_opt(2024, 9, 29).unwrap());
            assert_eq!(window.start(), utc(2024, 9, 23, 0, 0, 0));
        }

        #[test]
        fn result_passes_validation() {
            let window = TimeWindow::containing(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
            assert_eq!(
                TimeWindow::from_utc(window.start(), window.end()).unwrap(),
                window
            );
        }
    }

    mod bounds {
        use super::*;

        #[test]
        fn exclusive_and_inclusive_checks() {
            let window = TimeWindow::containing(NaiveDate::from_ymd_opt(2024, 9, 23).unwrap());
            assert!(!window.contains_exclusive(window.start()));
            assert!(window.contains_inclusive(window.start()));
            assert!(window.contains_inclusive(window.end()));
            assert!(window.contains_exclusive(utc(2024, 9, 25, 12, 0, 0)));
            assert!(!window.contains_inclusive(utc(2024, 9, 30, 0, 0, 0)));
        }
    }

    mod serde_boundary {
        use super::*;

        #[test]
        fn deserialization_validates() {
            let ok: TimeWindow = serde_json::from_str(
                r#"{"start":"2024-09-23T00:00:00Z","end":"2024-09-29T23:59:59Z"}"#,
            )
            .unwrap();
            assert_eq!(ok.start(), utc(2024, 9, 23, 0, 0, 0));

            let err = serde_json::from_str::<TimeWindow>(
                r#"{"start":"2024-09-24T00:00:00Z","end":"2024-09-29T23:59:59Z"}"#,
            )
            .unwrap_err();
            assert!(err.to_string().contains("timeMin"));
        }
    }
}
