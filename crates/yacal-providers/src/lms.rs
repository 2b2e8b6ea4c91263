//! LMS (Moodle web services): course modules with due dates.

use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};
use yacal_core::NormalizedEvent;
use yacal_protocol::{Credentials, LmsUser};

use crate::error::{ProviderError, ProviderResult};
use crate::fetcher::{BoxFuture, Credential, FetchRequest, Upstream, UpstreamFetcher};
use crate::http::{HttpSettings, UpstreamClient};
use crate::normalize::lms_events;

pub const DEFAULT_BASE_URL: &str = "https://lms.utmn.ru";
pub const DEFAULT_SERVICE: &str = "test";
pub const TOKEN_PATH: &str = "/login/token.php";
pub const WEBSERVICE_PATH: &str = "/webservice/rest/server.php";

const INVALID_TOKEN: &str = "invalidtoken";

#[derive(Debug, Clone, Deserialize)]
pub struct LmsCourse {
    pub id: i64,
    #[serde(default)]
    pub shortname: String,
    pub fullname: String,
}

/// One section of a course page.
#[derive(Debug, Clone, Deserialize)]
pub struct LmsSection {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub modules: Vec<LmsModule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LmsModule {
    pub id: i64,
    #[serde(default)]
    pub url: Option<String>,
    pub name: String,
    #[serde(default = "visible")]
    pub uservisible: bool,
    #[serde(default)]
    pub modname: String,
    #[serde(default)]
    pub dates: Vec<ModuleDate>,
    #[serde(default)]
    pub completiondata: Option<CompletionData>,
}

fn visible() -> bool {
    true
}

impl LmsModule {
    /// Opening and due date, when the module has both.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match self.dates.as_slice() {
            [opens, due, ..] => Some((opens.timestamp, due.timestamp)),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completiondata
            .as_ref()
            .is_some_and(CompletionData::is_completed)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModuleDate {
    #[serde(default)]
    pub label: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CompletionData {
    pub state: i64,
}

impl CompletionData {
    /// State 1 is "complete"; 0 and the pass/fail states above 1 are not.
    pub fn is_completed(&self) -> bool {
        self.state == 1
    }
}

/// Error object Moodle returns with a 200 status.
#[derive(Debug, Deserialize)]
struct MoodleError {
    #[serde(default)]
    errorcode: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    exception: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl MoodleError {
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if !["errorcode", "error", "exception"]
            .iter()
            .any(|key| object.contains_key(*key))
        {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    fn describe(&self) -> String {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .or(self.errorcode.as_deref())
            .or(self.exception.as_deref())
            .unwrap_or("unknown LMS error")
            .to_string()
    }

    fn into_provider_error(self) -> ProviderError {
        let message = self.describe();
        let err = if self.errorcode.as_deref() == Some(INVALID_TOKEN) {
            ProviderError::authentication(message)
        } else {
            ProviderError::bad_request(message)
        };
        err.with_upstream(Upstream::Lms)
    }
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    token: String,
}

#[derive(Debug, Deserialize)]
struct MoodleUser {
    id: i64,
}

/// Client for the Moodle REST web services.
#[derive(Debug, Clone)]
pub struct LmsClient {
    http: UpstreamClient,
    service: String,
}

impl LmsClient {
    pub fn new(base_url: &str, service: impl Into<String>, settings: &HttpSettings) -> ProviderResult<Self> {
        Ok(Self {
            http: UpstreamClient::new(Upstream::Lms, base_url, settings)?,
            service: service.into(),
        })
    }

    /// Calls one web-service function and decodes its result.
    async fn call<T: DeserializeOwned>(
        &self,
        token: &str,
        function: &str,
        params: &[(&str, String)],
    ) -> ProviderResult<T> {
        let url = self.http.endpoint(WEBSERVICE_PATH)?;
        let value: Value = self
            .http
            .send_json(|http| {
                http.get(url.clone())
                    .query(&[
                        ("wstoken", token),
                        ("wsfunction", function),
                        ("moodlewsrestformat", "json"),
                    ])
                    .query(params)
            })
            .await?;

        if let Some(error) = MoodleError::from_value(&value) {
            return Err(error.into_provider_error());
        }
        serde_json::from_value(value).map_err(|e| {
            ProviderError::invalid_response(format!("Unexpected {function} payload: {e}"))
                .with_upstream(Upstream::Lms)
                .with_source(e)
        })
    }

    pub async fn courses(&self, user_id: i64, token: &str) -> ProviderResult<Vec<LmsCourse>> {
        self.call(
            token,
            "core_enrol_get_users_courses",
            &[("userid", user_id.to_string())],
        )
        .await
    }

    pub async fn course_contents(&self, course_id: i64, token: &str) -> ProviderResult<Vec<LmsSection>> {
        self.call(
            token,
            "core_course_get_contents",
            &[("courseid", course_id.to_string())],
        )
        .await
    }

    /// Exchanges a username and password for a web-service token and
    /// resolves the numeric user id.
    #[instrument(skip_all, fields(upstream = "lms"))]
    pub async fn login(&self, credentials: &Credentials) -> ProviderResult<LmsUser> {
        let url = self.http.endpoint(TOKEN_PATH)?;
        let form = [
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
            ("service", self.service.as_str()),
        ];
        let value: Value = self
            .http
            .send_json(|http| http.post(url.clone()).form(&form))
            .await?;

        if let Some(error) = MoodleError::from_value(&value) {
            return Err(ProviderError::authentication(error.describe()).with_upstream(Upstream::Lms));
        }
        let TokenReply { token } = serde_json::from_value(value).map_err(|e| {
            ProviderError::invalid_response(format!("Unexpected token payload: {e}"))
                .with_upstream(Upstream::Lms)
        })?;

        let login = credentials
            .username
            .split('@')
            .next()
            .unwrap_or(&credentials.username)
            .to_string();
        let users: Vec<MoodleUser> = self
            .call(
                &token,
                "core_user_get_users_by_field",
                &[("field", "username".to_string()), ("values[0]", login)],
            )
            .await?;

        let user = users.first().ok_or_else(|| {
            ProviderError::not_found("No LMS user matches this login").with_upstream(Upstream::Lms)
        })?;
        debug!(user_id = user.id, "lms login succeeded");
        Ok(LmsUser { id: user.id, token })
    }
}

impl UpstreamFetcher for LmsClient {
    fn upstream(&self) -> Upstream {
        Upstream::Lms
    }

    fn fetch<'a>(
        &'a self,
        request: &'a FetchRequest,
    ) -> BoxFuture<'a, ProviderResult<Vec<NormalizedEvent>>> {
        Box::pin(async move {
            let Credential::LmsToken { user_id, token } = &request.credential else {
                return Err(ProviderError::configuration(format!(
                    "LMS expects a token and user id, got a {}",
                    request.credential.kind()
                ))
                .with_upstream(Upstream::Lms));
            };

            let courses = self.courses(*user_id, token).await?;
            let window = request.window;
            let per_course = try_join_all(courses.iter().map(|course| async move {
                let sections = self.course_contents(course.id, token).await?;
                Ok::<_, ProviderError>(lms_events(course, &sections, &window))
            }))
            .await?;

            let events: Vec<_> = per_course.into_iter().flatten().collect();
            debug!(
                courses = courses.len(),
                count = events.len(),
                "normalized lms events"
            );
            Ok(events)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;
    use crate::retry::RetryPolicy;
    use chrono::{NaiveDate, TimeZone};
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use yacal_core::TimeWindow;

    fn settings() -> HttpSettings {
        HttpSettings {
            retry: RetryPolicy::none(),
            ..HttpSettings::default()
        }
    }

    fn request(credential: Credential) -> FetchRequest {
        FetchRequest {
            window: TimeWindow::containing(NaiveDate::from_ymd_opt(2024, 9, 23).unwrap()),
            person_id: "p-1".into(),
            calendar_id: 45526,
            page_size: 50,
            credential,
        }
    }

    fn ts(d: u32, h: u32) -> i64 {
        Utc.with_ymd_and_hms(2024, 9, d, h, 0, 0).unwrap().timestamp()
    }

    fn contents(module_id: i64, due_day: u32) -> Value {
        serde_json::json!([{
            "id": 1, "name": "Неделя 1",
            "modules": [{
                "id": module_id,
                "url": format!("https://lms.utmn.ru/mod/quiz/view.php?id={module_id}"),
                "name": "Тест",
                "uservisible": true,
                "modname": "quiz",
                "dates": [
                    {"label": "Opened:", "timestamp": ts(16, 0), "dataid": "timeopen"},
                    {"label": "Closes:", "timestamp": ts(due_day, 20), "dataid": "timeclose"}
                ],
                "completiondata": {"state": 1}
            }]
        }])
    }

    async fn mount_ws(server: &MockServer, function: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(WEBSERVICE_PATH))
            .and(query_param("wsfunction", function))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[test]
    fn completion_states() {
        assert!(!CompletionData { state: 0 }.is_completed());
        assert!(CompletionData { state: 1 }.is_completed());
        assert!(!CompletionData { state: 2 }.is_completed());
        assert!(!CompletionData { state: 3 }.is_completed());
    }

    #[test]
    fn module_span_needs_two_dates() {
        let module: LmsModule = serde_json::from_value(serde_json::json!({
            "id": 9, "name": "Page", "modname": "page",
            "dates": [{"label": "Opened:", "timestamp": ts(16, 0)}]
        }))
        .unwrap();
        assert!(module.uservisible);
        assert_eq!(module.span(), None);
        assert!(!module.is_completed());
    }

    #[test]
    fn recognizes_error_payloads() {
        let invalid = serde_json::json!({
            "exception": "moodle_exception",
            "errorcode": "invalidtoken",
            "message": "Invalid token - token not found"
        });
        let err = MoodleError::from_value(&invalid).unwrap().into_provider_error();
        assert_eq!(err.code(), ProviderErrorCode::AuthenticationFailed);
        assert_eq!(err.message(), "Invalid token - token not found");

        let other = serde_json::json!({"exception": "invalid_parameter_exception"});
        let err = MoodleError::from_value(&other).unwrap().into_provider_error();
        assert_eq!(err.code(), ProviderErrorCode::BadRequest);

        assert!(MoodleError::from_value(&serde_json::json!([])).is_none());
        assert!(MoodleError::from_value(&serde_json::json!({"token": "t"})).is_none());
    }

    #[tokio::test]
    async fn fetch_walks_every_course() {
        let server = MockServer::start().await;
        mount_ws(
            &server,
            "core_enrol_get_users_courses",
            serde_json::json!([
                {"id": 10, "shortname": "PHY", "fullname": "Физика"},
                {"id": 11, "shortname": "CHM", "fullname": "Химия"}
            ]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path(WEBSERVICE_PATH))
            .and(query_param("wsfunction", "core_course_get_contents"))
            .and(query_param("courseid", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(contents(701, 27)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(WEBSERVICE_PATH))
            .and(query_param("wsfunction", "core_course_get_contents"))
            .and(query_param("courseid", "11"))
            .respond_with(ResponseTemplate::new(200).set_body_json(contents(702, 30)))
            .expect(1)
            .mount(&server)
            .await;

        let client = LmsClient::new(&server.uri(), DEFAULT_SERVICE, &settings()).unwrap();
        let events = client
            .fetch(&request(Credential::LmsToken {
                user_id: 5,
                token: "tok".into(),
            }))
            .await
            .unwrap();

        // The chemistry quiz closes after the week ends.
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "701");
        assert_eq!(events[0].course.as_deref(), Some("Физика"));
        assert_eq!(events[0].completed, Some(true));
    }

    #[tokio::test]
    async fn invalid_token_fails_the_fetch() {
        let server = MockServer::start().await;
        mount_ws(
            &server,
            "core_enrol_get_users_courses",
            serde_json::json!({"exception": "moodle_exception", "errorcode": "invalidtoken"}),
        )
        .await;

        let client = LmsClient::new(&server.uri(), DEFAULT_SERVICE, &settings()).unwrap();
        let err = client
            .fetch(&request(Credential::LmsToken {
                user_id: 5,
                token: "stale".into(),
            }))
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(err.upstream(), Some(Upstream::Lms));
    }

    #[tokio::test]
    async fn one_failing_course_fails_the_fetch() {
        let server = MockServer::start().await;
        mount_ws(
            &server,
            "core_enrol_get_users_courses",
            serde_json::json!([
                {"id": 10, "shortname": "PHY", "fullname": "Физика"},
                {"id": 11, "shortname": "CHM", "fullname": "Химия"}
            ]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path(WEBSERVICE_PATH))
            .and(query_param("courseid", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(contents(701, 27)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(WEBSERVICE_PATH))
            .and(query_param("courseid", "11"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = LmsClient::new(&server.uri(), DEFAULT_SERVICE, &settings()).unwrap();
        let err = client
            .fetch(&request(Credential::LmsToken {
                user_id: 5,
                token: "tok".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::ServerError);
    }

    #[tokio::test]
    async fn login_resolves_user_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("service=test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "ws-token"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(WEBSERVICE_PATH))
            .and(query_param("wsfunction", "core_user_get_users_by_field"))
            .and(query_param("values[0]", "stud0001"))
            .and(query_param("wstoken", "ws-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{"id": 321, "username": "stud0001"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = LmsClient::new(&server.uri(), DEFAULT_SERVICE, &settings()).unwrap();
        let user = client
            .login(&Credentials {
                username: "stud0001@study.utmn.ru".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();
        assert_eq!(user.id, 321);
        assert_eq!(user.token, "ws-token");
    }

    #[tokio::test]
    async fn login_error_payload_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "Invalid login, please try again",
                "errorcode": "invalidlogin"
            })))
            .mount(&server)
            .await;

        let client = LmsClient::new(&server.uri(), DEFAULT_SERVICE, &settings()).unwrap();
        let err = client
            .login(&Credentials {
                username: "stud0001".into(),
                password: "wrong".into(),
            })
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(err.message(), "Invalid login, please try again");
    }
}
