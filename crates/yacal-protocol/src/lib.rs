//! Request/response types of the yacal HTTP API.
//!
//! Calendar endpoints take a [`WeekBody`] plus [`CalendarQuery`] parameters and
//! answer with a [`CalendarResponse`] (or [`RefreshedCalendarResponse`]).
//! Failures are always wrapped in an [`ErrorEnvelope`].

mod error;
mod types;

pub use error::{ErrorCode, ErrorEnvelope, ErrorResponse};
pub use types::{
    AccessToken, CalendarQuery, CalendarResponse, Credentials, DEFAULT_PAGE_SIZE, HealthResponse,
    LmsUser, MAX_LINK_LEN, MtsLinkBody, NETOLOGY_SESSION_COOKIE, NetologySection,
    NetologySession, RefreshedCalendarResponse, StatusResponse, TutorLogin, UtmnSection, WeekBody,
};

/// Version prefix of every API route.
pub const API_PREFIX: &str = "/api/v1";
