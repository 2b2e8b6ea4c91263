//! Modeus: university timetable search.

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use tracing::{debug, instrument};
use yacal_core::{NormalizedEvent, TimeWindow};
use yacal_protocol::WeekBody;

use crate::error::{ProviderError, ProviderResult};
use crate::fetcher::{BoxFuture, Credential, FetchRequest, Upstream, UpstreamFetcher};
use crate::http::{HttpSettings, UpstreamClient};
use crate::normalize::modeus_events;
use crate::serde_time;

pub const DEFAULT_BASE_URL: &str = "https://utmn.modeus.org";
pub const SEARCH_PATH: &str = "/schedule-calendar-v2/api/calendar/events/search";

/// A HAL link.
#[derive(Debug, Clone, Deserialize)]
pub struct Href {
    pub href: String,
}

impl Href {
    /// The identifier a link points at (`/uuid` becomes `uuid`).
    pub fn id(&self) -> String {
        self.href.replace('/', "")
    }
}

/// Search response; the interesting part lives under `_embedded`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModeusCalendar {
    #[serde(rename = "_embedded", default)]
    pub embedded: ModeusEmbedded,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModeusEmbedded {
    #[serde(default)]
    pub events: Vec<ModeusEvent>,
    #[serde(rename = "event-locations", default)]
    pub locations: Vec<EventLocation>,
    #[serde(rename = "event-attendees", default)]
    pub attendees: Vec<EventAttendee>,
    #[serde(default)]
    pub persons: Vec<Person>,
    #[serde(rename = "course-unit-realizations", default)]
    pub courses: Vec<CourseUnit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModeusEvent {
    pub id: String,
    pub name: String,
    #[serde(rename = "nameShort", default)]
    pub name_short: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(deserialize_with = "serde_time::instant")]
    pub start: DateTime<FixedOffset>,
    #[serde(deserialize_with = "serde_time::instant")]
    pub end: DateTime<FixedOffset>,
    #[serde(rename = "_links", default)]
    pub links: EventLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventLinks {
    #[serde(rename = "course-unit-realization", default)]
    pub course_unit_realization: Option<Href>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventLocation {
    #[serde(rename = "eventId")]
    pub event_id: String,
    #[serde(rename = "customLocation", default)]
    pub custom_location: Option<String>,
}

impl EventLocation {
    /// Self-paced LXP slots have no real location and are not classes.
    pub fn is_lxp(&self) -> bool {
        match self.custom_location.as_deref() {
            None => true,
            Some(location) => location == "LXP",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventAttendee {
    #[serde(rename = "_links")]
    pub links: AttendeeLinks,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttendeeLinks {
    pub event: Href,
    pub person: Href,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Person {
    pub id: String,
    #[serde(rename = "fullName")]
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CourseUnit {
    pub id: String,
    pub name: String,
}

/// Client for the Modeus calendar API.
#[derive(Debug, Clone)]
pub struct ModeusClient {
    http: UpstreamClient,
}

impl ModeusClient {
    pub fn new(base_url: &str, settings: &HttpSettings) -> ProviderResult<Self> {
        Ok(Self {
            http: UpstreamClient::new(Upstream::Modeus, base_url, settings)?,
        })
    }

    /// Searches the events of one person.
    #[instrument(skip(self, token), fields(upstream = "modeus"))]
    pub async fn search(
        &self,
        window: TimeWindow,
        person_id: &str,
        page_size: u32,
        token: &str,
    ) -> ProviderResult<ModeusCalendar> {
        let url = self.http.endpoint(SEARCH_PATH)?;
        let body = WeekBody {
            size: page_size,
            ..WeekBody::new(window, person_id)
        };

        self.http
            .send_json(|http| http.post(url.clone()).bearer_auth(token).json(&body))
            .await
    }
}

impl UpstreamFetcher for ModeusClient {
    fn upstream(&self) -> Upstream {
        Upstream::Modeus
    }

    fn fetch<'a>(
        &'a self,
        request: &'a FetchRequest,
    ) -> BoxFuture<'a, ProviderResult<Vec<NormalizedEvent>>> {
        Box::pin(async move {
            let Credential::Bearer(token) = &request.credential else {
                return Err(ProviderError::configuration(format!(
                    "Modeus expects a bearer token, got a {}",
                    request.credential.kind()
                ))
                .with_upstream(Upstream::Modeus));
            };

            let calendar = self
                .search(request.window, &request.person_id, request.page_size, token)
                .await?;
            let events = modeus_events(&calendar);
            debug!(
                received = calendar.embedded.events.len(),
                kept = events.len(),
                "normalized modeus events"
            );
            Ok(events)
        })
    }
}
