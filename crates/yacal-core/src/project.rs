//! Re-expressing snapshot instants in a caller's timezone.

use chrono_tz::Tz;
use thiserror::Error;

use crate::snapshot::CalendarSnapshot;

/// The requested zone is not a known IANA identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown timezone {zone:?}: {reason}")]
pub struct ProjectionError {
    pub zone: String,
    pub reason: String,
}

/// Rewrites event instants into a fixed target zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimezoneProjector {
    zone: Tz,
}

impl TimezoneProjector {
    /// Parses an IANA zone name such as `Europe/Moscow`.
    pub fn new(zone: &str) -> Result<Self, ProjectionError> {
        let zone = zone.parse::<Tz>().map_err(|e| ProjectionError {
            zone: zone.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { zone })
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    /// Rewrites every present `start`/`end` in place and returns the same
    /// snapshot. Absolute instants never change, only their offsets, so
    /// applying the projection again is a no-op.
    pub fn project<'a>(&self, snapshot: &'a mut CalendarSnapshot) -> &'a mut CalendarSnapshot {
        for event in snapshot.events_mut() {
            if let Some(start) = event.start {
                event.start = Some(start.with_timezone(&self.zone).fixed_offset());
            }
            if let Some(end) = event.end {
                event.end = Some(end.with_timezone(&self.zone).fixed_offset());
            }
        }
        snapshot
    }
}
