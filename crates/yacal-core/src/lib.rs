//! Core types: week windows, normalized events, snapshots, projection, ICS export

pub mod event;
pub mod ics;
pub mod project;
pub mod snapshot;
pub mod time;
pub mod tracing;

pub use event::{EventKind, NormalizedEvent};
pub use ics::{IcsExporter, UNKNOWN_LOCATION};
pub use project::{ProjectionError, TimezoneProjector};
pub use snapshot::{CalendarSnapshot, SnapshotHash};
pub use time::{TimeWindow, ValidationError, week_span};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
