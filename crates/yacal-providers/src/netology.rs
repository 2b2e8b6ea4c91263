//! Netology: program calendar fetcher and session sign-in.

use chrono::{DateTime, FixedOffset};
use reqwest::header::{COOKIE, HeaderMap, SET_COOKIE};
use serde::Deserialize;
use tracing::{debug, instrument};
use yacal_core::NormalizedEvent;
use yacal_protocol::{Credentials, NETOLOGY_SESSION_COOKIE, NetologySession};

use crate::error::{ProviderError, ProviderResult};
use crate::fetcher::{BoxFuture, Credential, FetchRequest, Upstream, UpstreamFetcher};
use crate::http::{HttpSettings, UpstreamClient};
use crate::normalize::netology_events;
use crate::serde_time;

pub const DEFAULT_BASE_URL: &str = "https://netology.ru";
pub const CALENDAR_PATH: &str = "/backend/api/user/programs/calendar";
pub const SIGN_IN_PATH: &str = "/backend/api/user/sign_in";

/// Program calendar as returned by Netology.
#[derive(Debug, Clone, Deserialize)]
pub struct NetologyCalendar {
    /// Name of the program block, used as the course of every item.
    #[serde(rename = "title")]
    pub block_title: String,
    #[serde(default)]
    pub lessons: Vec<NetologyLesson>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetologyLesson {
    #[serde(default)]
    pub lesson_items: Vec<LessonItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LessonItem {
    pub id: i64,
    /// `task`, `test`, `quiz`, `webinar` and a few kinds we ignore.
    #[serde(rename = "type")]
    pub item_type: String,
    pub title: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, deserialize_with = "serde_time::optional_instant")]
    pub starts_at: Option<DateTime<FixedOffset>>,
    #[serde(default, deserialize_with = "serde_time::optional_instant")]
    pub ends_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub webinar_url: Option<String>,
}

impl LessonItem {
    pub fn is_homework(&self) -> bool {
        matches!(self.item_type.as_str(), "task" | "test" | "quiz")
    }

    pub fn is_webinar(&self) -> bool {
        self.item_type == "webinar"
    }
}

/// Client for the Netology backend API.
#[derive(Debug, Clone)]
pub struct NetologyClient {
    http: UpstreamClient,
}

impl NetologyClient {
    pub fn new(base_url: &str, settings: &HttpSettings) -> ProviderResult<Self> {
        Ok(Self {
            http: UpstreamClient::new(Upstream::Netology, base_url, settings)?,
        })
    }

    /// Downloads the raw calendar of one program.
    #[instrument(skip(self, session), fields(upstream = "netology"))]
    pub async fn calendar(&self, calendar_id: i64, session: &str) -> ProviderResult<NetologyCalendar> {
        let url = self.http.endpoint(CALENDAR_PATH)?;
        let cookie = format!("{NETOLOGY_SESSION_COOKIE}={session}");

        self.http
            .send_json(|http| {
                http.get(url.clone())
                    .query(&[("program_ids[]", calendar_id)])
                    .header(COOKIE, &cookie)
            })
            .await
            .map_err(|e| {
                if e.is_unauthorized() {
                    ProviderError::authentication("Cookies expired.").with_upstream(Upstream::Netology)
                } else {
                    e
                }
            })
    }

    /// Signs in with a username and password, returning the session cookie.
    #[instrument(skip_all, fields(upstream = "netology"))]
    pub async fn sign_in(&self, credentials: &Credentials) -> ProviderResult<NetologySession> {
        let url = self.http.endpoint(SIGN_IN_PATH)?;
        let form = [
            ("login", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
            ("remember", "1"),
        ];

        let reply = self
            .http
            .send(|http| http.post(url.clone()).form(&form))
            .await
            .map_err(|e| {
                if e.is_unauthorized() {
                    ProviderError::authentication("Username/password is incorrect.")
                        .with_upstream(Upstream::Netology)
                } else {
                    e
                }
            })?;

        let rails_session = session_cookie(&reply.headers).ok_or_else(|| {
            ProviderError::invalid_response("Sign-in response carried no session cookie")
                .with_upstream(Upstream::Netology)
        })?;
        debug!("netology sign-in succeeded");
        Ok(NetologySession { rails_session })
    }
}

impl UpstreamFetcher for NetologyClient {
    fn upstream(&self) -> Upstream {
        Upstream::Netology
    }

    fn fetch<'a>(
        &'a self,
        request: &'a FetchRequest,
    ) -> BoxFuture<'a, ProviderResult<Vec<NormalizedEvent>>> {
        Box::pin(async move {
            let Credential::NetologySession(session) = &request.credential else {
                return Err(ProviderError::configuration(format!(
                    "Netology expects a session cookie, got a {}",
                    request.credential.kind()
                ))
                .with_upstream(Upstream::Netology));
            };

            let calendar = self.calendar(request.calendar_id, session).await?;
            let events = netology_events(&calendar, &request.window, self.http.base_url());
            debug!(count = events.len(), "normalized netology events");
            Ok(events)
        })
    }
}

/// Value of the session cookie among the response's `Set-Cookie` headers.
fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| name.trim() == NETOLOGY_SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
}
