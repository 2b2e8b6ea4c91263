//! Event types shared by every upstream.
//!
//! - [`EventKind`]: which of the four calendar lists an event belongs to
//! - [`NormalizedEvent`]: the source-agnostic event shape

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// The category of a normalized event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A Netology task, test or quiz with a deadline.
    Homework,
    /// A Netology live webinar.
    Webinar,
    /// A Modeus timetable entry.
    ScheduledClass,
    /// A Moodle course module with due dates.
    LmsModule,
}

impl EventKind {
    /// Title prefix used when the event is exported to iCalendar.
    pub fn export_prefix(&self) -> &'static str {
        match self {
            Self::Homework => "Netology ДЗ",
            Self::Webinar => "Netology",
            Self::ScheduledClass => "Modeus",
            Self::LmsModule => "LMS",
        }
    }
}

/// A calendar event after normalization.
///
/// Instants are optional because upstreams omit them (a homework item without
/// a parsable deadline, a webinar not yet scheduled). Homework deadlines live
/// in `end`. `start <= end` is not enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Upstream identifier, unique within its source.
    pub id: String,
    /// Which list the event belongs to.
    pub kind: EventKind,
    /// The event's own title (lesson, class or module name).
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Link to the event in its source system.
    #[serde(default)]
    pub url: Option<String>,
    /// The enclosing course or program block.
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default)]
    pub teacher: Option<String>,
    /// Completion flag, reported only by the LMS.
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub start: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub end: Option<DateTime<FixedOffset>>,
}

impl NormalizedEvent {
    /// Creates an event with no optional fields set.
    pub fn new(id: impl Into<String>, kind: EventKind, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            description: None,
            url: None,
            course: None,
            teacher: None,
            completed: None,
            start: None,
            end: None,
        }
    }

    /// The homework deadline, if this is a homework item that has one.
    pub fn deadline(&self) -> Option<DateTime<FixedOffset>> {
        match self.kind {
            EventKind::Homework => self.end,
            _ => None,
        }
    }

    pub fn start_utc(&self) -> Option<DateTime<Utc>> {
        self.start.map(|at| at.with_timezone(&Utc))
    }

    pub fn end_utc(&self) -> Option<DateTime<Utc>> {
        self.end.map(|at| at.with_timezone(&Utc))
    }

    /// Builder method to set the start instant.
    pub fn with_start<Tz: TimeZone>(mut self, at: DateTime<Tz>) -> Self {
        self.start = Some(at.fixed_offset());
        self
    }

    /// Builder method to set the end instant.
    pub fn with_end<Tz: TimeZone>(mut self, at: DateTime<Tz>) -> Self {
        self.end = Some(at.fixed_offset());
        self
    }

    /// Builder method to set the homework deadline.
    pub fn with_deadline<Tz: TimeZone>(self, at: DateTime<Tz>) -> Self {
        self.with_end(at)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_course(mut self, course: impl Into<String>) -> Self {
        self.course = Some(course.into());
        self
    }

    pub fn with_teacher(mut self, teacher: impl Into<String>) -> Self {
        self.teacher = Some(teacher.into());
        self
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    mod event_kind {
        use super::*;

        #[test]
        fn serializes_snake_case() {
            let json = serde_json::to_string(&EventKind::ScheduledClass).unwrap();
            assert_eq!(json, "\"scheduled_class\"");
            let parsed: EventKind = serde_json::from_str("\"lms_module\"").unwrap();
            assert_eq!(parsed, EventKind::LmsModule);
        }

        #[test]
        fn export_prefixes() {
            assert_eq!(EventKind::Homework.export_prefix(), "Netology ДЗ");
            assert_eq!(EventKind::Webinar.export_prefix(), "Netology");
            assert_eq!(EventKind::ScheduledClass.export_prefix(), "Modeus");
            assert_eq!(EventKind::LmsModule.export_prefix(), "LMS");
        }
    }

    mod normalized_event {
        use super::*;

        #[test]
        fn builder_sets_fields() {
            let event = NormalizedEvent::new("42", EventKind::Webinar, "Intro")
                .with_start(utc(2024, 9, 24, 16, 0, 0))
                .with_end(utc(2024, 9, 24, 17, 30, 0))
                .with_url("https://example.com/w/42")
                .with_course("Python");

            assert_eq!(event.start_utc(), Some(utc(2024, 9, 24, 16, 0, 0)));
            assert_eq!(event.end_utc(), Some(utc(2024, 9, 24, 17, 30, 0)));
            assert_eq!(event.url.as_deref(), Some("https://example.com/w/42"));
            assert_eq!(event.course.as_deref(), Some("Python"));
            assert!(event.description.is_none());
            assert!(event.deadline().is_none());
        }

        #[test]
        fn homework_deadline_is_end() {
            let event = NormalizedEvent::new("7", EventKind::Homework, "Task 01.10.24")
                .with_deadline(utc(2024, 10, 1, 0, 0, 0));
            assert_eq!(
                event.deadline().map(|d| d.with_timezone(&Utc)),
                Some(utc(2024, 10, 1, 0, 0, 0))
            );
            assert!(event.start.is_none());
        }

        #[test]
        fn missing_optionals_deserialize_as_none() {
            let event: NormalizedEvent =
                serde_json::from_str(r#"{"id":"1","kind":"homework","title":"t"}"#).unwrap();
            assert_eq!(event, NormalizedEvent::new("1", EventKind::Homework, "t"));
        }

        #[test]
        fn start_before_end_is_not_enforced() {
            let event = NormalizedEvent::new("x", EventKind::ScheduledClass, "odd")
                .with_start(utc(2024, 9, 25, 12, 0, 0))
                .with_end(utc(2024, 9, 25, 10, 0, 0));
            assert!(event.start_utc() > event.end_utc());
        }
    }
}
