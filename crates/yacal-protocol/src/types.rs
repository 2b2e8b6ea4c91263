//! Request and response bodies of the calendar API.

use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;
use yacal_core::{CalendarSnapshot, NormalizedEvent, TimeWindow, ValidationError};

/// Default page size forwarded to the scheduling upstream.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Body of every calendar endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekBody {
    #[serde(rename = "timeMin")]
    pub time_min: DateTime<FixedOffset>,
    #[serde(rename = "timeMax")]
    pub time_max: DateTime<FixedOffset>,
    #[serde(default = "default_page_size")]
    pub size: u32,
    #[serde(rename = "attendeePersonId", default)]
    pub attendee_person_id: Vec<String>,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl WeekBody {
    pub fn new(window: TimeWindow, person_id: impl Into<String>) -> Self {
        Self {
            time_min: window.start().fixed_offset(),
            time_max: window.end().fixed_offset(),
            size: DEFAULT_PAGE_SIZE,
            attendee_person_id: vec![person_id.into()],
        }
    }

    /// The validated week this body asks for.
    pub fn window(&self) -> Result<TimeWindow, ValidationError> {
        TimeWindow::week(self.time_min, self.time_max)
    }

    /// The person whose schedule is requested: the first attendee id.
    pub fn person_id(&self) -> Result<&str, ValidationError> {
        match self.attendee_person_id.first().map(|id| id.trim()) {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(ValidationError::invalid(
                "attendeePersonId",
                "at least one person id is required",
            )),
        }
    }
}

/// Query parameters shared by the calendar endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarQuery {
    #[serde(default)]
    pub calendar_id: Option<i64>,
    #[serde(default)]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetologySection {
    pub homework: Vec<NormalizedEvent>,
    pub webinars: Vec<NormalizedEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmnSection {
    pub modeus_events: Vec<NormalizedEvent>,
    pub lms_events: Vec<NormalizedEvent>,
}

/// A calendar snapshot as seen by API clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarResponse {
    pub netology: NetologySection,
    pub utmn: UtmnSection,
    pub cached_at: DateTime<Utc>,
}

impl From<CalendarSnapshot> for CalendarResponse {
    fn from(snapshot: CalendarSnapshot) -> Self {
        Self {
            netology: NetologySection {
                homework: snapshot.netology_homework,
                webinars: snapshot.netology_webinars,
            },
            utmn: UtmnSection {
                modeus_events: snapshot.scheduled_classes,
                lms_events: snapshot.lms_modules,
            },
            cached_at: snapshot.cached_at,
        }
    }
}

/// Response of the refresh endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshedCalendarResponse {
    #[serde(flatten)]
    pub calendar: CalendarResponse,
    /// Whether the content differs from what was cached before the refresh.
    pub changed: bool,
}

impl RefreshedCalendarResponse {
    pub fn new(snapshot: CalendarSnapshot, changed: bool) -> Self {
        Self {
            calendar: snapshot.into(),
            changed,
        }
    }
}

/// Username and password for a login endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Name of the Netology session cookie, also accepted as a request header.
pub const NETOLOGY_SESSION_COOKIE: &str = "_netology-on-rails_session";

/// Result of a successful Netology login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetologySession {
    #[serde(rename = "_netology-on-rails_session")]
    pub rails_session: String,
}

/// Result of a successful LMS login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmsUser {
    pub id: i64,
    pub token: String,
}

/// Body of the tutor login endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TutorLogin {
    pub password: String,
}

impl fmt::Debug for TutorLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TutorLogin")
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A signed token for the `Authorization: Bearer` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
}

impl AccessToken {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            access_token: token.into(),
            token_type: "bearer".to_string(),
        }
    }
}

/// Longest webinar link accepted.
pub const MAX_LINK_LEN: usize = 2083;

/// A webinar link attached to one Modeus lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MtsLinkBody {
    #[serde(rename = "lessonId")]
    pub lesson_id: Uuid,
    pub url: String,
}

impl MtsLinkBody {
    /// The link as an absolute `http`/`https` URL with a host.
    pub fn link(&self) -> Result<Url, ValidationError> {
        let raw = self.url.trim();
        if raw.len() > MAX_LINK_LEN {
            return Err(ValidationError::invalid(
                "url",
                format!("must be at most {MAX_LINK_LEN} characters"),
            ));
        }
        let url = Url::parse(raw).map_err(|e| ValidationError::invalid("url", e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ValidationError::invalid("url", "must be an http(s) URL"));
        }
        Ok(url)
    }
}

/// Bare acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
