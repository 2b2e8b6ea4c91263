//! The merged calendar for one window and person.

use std::fmt;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{EventKind, NormalizedEvent};

/// Point-in-time aggregation result across all upstreams.
///
/// Each event sits in the list matching its [`EventKind`]. Apart from
/// timezone projection, a snapshot is not modified after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSnapshot {
    pub netology_homework: Vec<NormalizedEvent>,
    pub netology_webinars: Vec<NormalizedEvent>,
    pub scheduled_classes: Vec<NormalizedEvent>,
    pub lms_modules: Vec<NormalizedEvent>,
    /// When the aggregation completed. Excluded from the content hash.
    pub cached_at: DateTime<Utc>,
}

impl CalendarSnapshot {
    /// An empty snapshot stamped with `cached_at`.
    pub fn empty(cached_at: DateTime<Utc>) -> Self {
        Self {
            netology_homework: Vec::new(),
            netology_webinars: Vec::new(),
            scheduled_classes: Vec::new(),
            lms_modules: Vec::new(),
            cached_at,
        }
    }

    /// Sorts events into their lists by kind, preserving input order.
    pub fn from_events(
        events: impl IntoIterator<Item = NormalizedEvent>,
        cached_at: DateTime<Utc>,
    ) -> Self {
        let mut snapshot = Self::empty(cached_at);
        for event in events {
            snapshot.list_mut(event.kind).push(event);
        }
        snapshot
    }

    /// The list holding events of `kind`.
    pub fn list(&self, kind: EventKind) -> &[NormalizedEvent] {
        match kind {
            EventKind::Homework => &self.netology_homework,
            EventKind::Webinar => &self.netology_webinars,
            EventKind::ScheduledClass => &self.scheduled_classes,
            EventKind::LmsModule => &self.lms_modules,
        }
    }

    fn list_mut(&mut self, kind: EventKind) -> &mut Vec<NormalizedEvent> {
        match kind {
            EventKind::Homework => &mut self.netology_homework,
            EventKind::Webinar => &mut self.netology_webinars,
            EventKind::ScheduledClass => &mut self.scheduled_classes,
            EventKind::LmsModule => &mut self.lms_modules,
        }
    }

    /// All events, list by list.
    pub fn events(&self) -> impl Iterator<Item = &NormalizedEvent> {
        self.netology_homework
            .iter()
            .chain(&self.netology_webinars)
            .chain(&self.scheduled_classes)
            .chain(&self.lms_modules)
    }

    pub fn events_mut(&mut self) -> impl Iterator<Item = &mut NormalizedEvent> {
        self.netology_homework
            .iter_mut()
            .chain(&mut self.netology_webinars)
            .chain(&mut self.scheduled_classes)
            .chain(&mut self.lms_modules)
    }

    pub fn len(&self) -> usize {
        self.netology_homework.len()
            + self.netology_webinars.len()
            + self.scheduled_classes.len()
            + self.lms_modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Digest of the snapshot content, ignoring `cached_at` and display offsets.
    ///
    /// The digest is MD5 over compact JSON of the four lists in declaration
    /// order. Every event is written with its fields in declaration order and
    /// every instant as RFC 3339 UTC with whole seconds, so projecting a
    /// snapshot to another zone leaves the digest unchanged. Sub-second
    /// differences between instants are ignored.
    ///
    /// # Errors
    ///
    /// Fails only if `serde_json` rejects the canonical form.
    pub fn content_hash(&self) -> serde_json::Result<SnapshotHash> {
        let canonical = CanonicalSnapshot {
            netology_homework: canonical_list(&self.netology_homework),
            netology_webinars: canonical_list(&self.netology_webinars),
            scheduled_classes: canonical_list(&self.scheduled_classes),
            lms_modules: canonical_list(&self.lms_modules),
        };
        let bytes = serde_json::to_vec(&canonical)?;
        Ok(SnapshotHash(format!("{:x}", md5::compute(bytes))))
    }
}

/// Hex digest used for change detection between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotHash(String);

impl SnapshotHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize)]
struct CanonicalSnapshot<'a> {
    netology_homework: Vec<CanonicalEvent<'a>>,
    netology_webinars: Vec<CanonicalEvent<'a>>,
    scheduled_classes: Vec<CanonicalEvent<'a>>,
    lms_modules: Vec<CanonicalEvent<'a>>,
}

#[derive(Serialize)]
struct CanonicalEvent<'a> {
    id: &'a str,
    kind: EventKind,
    title: &'a str,
    description: Option<&'a str>,
    url: Option<&'a str>,
    course: Option<&'a str>,
    teacher: Option<&'a str>,
    completed: Option<bool>,
    start: Option<String>,
    end: Option<String>,
}

fn canonical_list(events: &[NormalizedEvent]) -> Vec<CanonicalEvent<'_>> {
    events
        .iter()
        .map(|event| CanonicalEvent {
            id: &event.id,
            kind: event.kind,
            title: &event.title,
            description: event.description.as_deref(),
            url: event.url.as_deref(),
            course: event.course.as_deref(),
            teacher: event.teacher.as_deref(),
            completed: event.completed,
            start: event.start.as_ref().map(canonical_instant),
            end: event.end.as_ref().map(canonical_instant),
        })
        .collect()
}

fn canonical_instant(at: &DateTime<FixedOffset>) -> String {
    at.with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}
