//! iCalendar export of a calendar snapshot.
//!
//! Placement rules per list:
//! - webinars are exported only when both `start` and `end` are known
//! - homework with a deadline becomes a two-hour block ending 18 hours after
//!   the deadline date (deadlines carry no time of day)
//! - scheduled classes are always exported; the timetable normalizer always
//!   sets both instants, so the only skip left is logged as an anomaly
//! - LMS modules become a two-hour block ending at the module's due date
//!
//! Skipped items are dropped silently.

use chrono::{DateTime, Duration, Utc};
use icalendar::{Calendar, Component, Event, EventLike};
use tracing::debug;

use crate::event::{EventKind, NormalizedEvent};
use crate::snapshot::CalendarSnapshot;

/// `PRODID`-style name of the exported calendar.
pub const CALENDAR_NAME: &str = "yet_another_calendar";

/// Location written when an event has no URL.
pub const UNKNOWN_LOCATION: &str = "unknown location";

const HOMEWORK_DEADLINE_SHIFT_HOURS: i64 = 18;
const SYNTHETIC_BLOCK_HOURS: i64 = 2;

/// Converts snapshots into iCalendar documents.
#[derive(Debug, Clone)]
pub struct IcsExporter {
    name: String,
}

impl Default for IcsExporter {
    fn default() -> Self {
        Self {
            name: CALENDAR_NAME.to_string(),
        }
    }
}

impl IcsExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the calendar display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Renders the whole snapshot, stamping every event with `now`.
    pub fn export(&self, snapshot: &CalendarSnapshot, now: DateTime<Utc>) -> String {
        let mut calendar = Calendar::new();
        calendar.name(&self.name);

        let mut emitted = 0usize;
        for event in snapshot.events() {
            if let Some(ics_event) = to_ics_event(event, now) {
                calendar.push(ics_event);
                emitted += 1;
            }
        }

        debug!(
            total = snapshot.len(),
            emitted,
            "exported snapshot to iCalendar"
        );
        calendar.to_string()
    }

    /// Same as [`export`](Self::export), as UTF-8 bytes.
    pub fn export_bytes(&self, snapshot: &CalendarSnapshot, now: DateTime<Utc>) -> Vec<u8> {
        self.export(snapshot, now).into_bytes()
    }
}

/// The exported time block for an event, or `None` if it must be skipped.
pub fn export_window(event: &NormalizedEvent) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    match event.kind {
        EventKind::Webinar => Some((event.start_utc()?, event.end_utc()?)),
        EventKind::ScheduledClass => match (event.start_utc(), event.end_utc()) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => {
                debug!(id = %event.id, "scheduled class without start or end, skipped");
                None
            }
        },
        EventKind::Homework => {
            let end = event.end_utc()? + Duration::hours(HOMEWORK_DEADLINE_SHIFT_HOURS);
            Some((end - Duration::hours(SYNTHETIC_BLOCK_HOURS), end))
        }
        EventKind::LmsModule => {
            let end = event.end_utc()?;
            Some((end - Duration::hours(SYNTHETIC_BLOCK_HOURS), end))
        }
    }
}

fn export_summary(event: &NormalizedEvent) -> String {
    let label = event.course.as_deref().unwrap_or(&event.title);
    format!("{}: {}", event.kind.export_prefix(), label)
}

fn to_ics_event(event: &NormalizedEvent, now: DateTime<Utc>) -> Option<Event> {
    let (start, end) = export_window(event)?;
    let location = event.url.as_deref().unwrap_or(UNKNOWN_LOCATION);

    let mut ics_event = Event::new();
    ics_event
        .uid(&event.id)
        .summary(&export_summary(event))
        .description(&event.title)
        .location(location)
        .starts(start)
        .ends(end)
        .timestamp(now);
    Some(ics_event.done())
}
