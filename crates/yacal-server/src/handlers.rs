//! HTTP handlers and extractors.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{ConnectInfo, FromRequestParts, Path, Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Redirect};
use tracing::{info, warn};
use uuid::Uuid;
use yacal_core::{TimezoneProjector, ValidationError};
use yacal_protocol::{
    AccessToken, CalendarQuery, CalendarResponse, Credentials, HealthResponse, LmsUser,
    MtsLinkBody, NETOLOGY_SESSION_COOKIE, NetologySession, RefreshedCalendarResponse,
    StatusResponse, TutorLogin, WeekBody,
};
use yacal_providers::Identity;

use crate::aggregator::CalendarRequest;
use crate::error::{EngineError, EngineResult};
use crate::ratelimit::{EndpointClass, client_ip};
use crate::state::AppState;

pub const LXP_TOKEN_HEADER: &str = "lxp-token";
pub const LXP_ID_HEADER: &str = "lxp-id";

const ICS_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";
const ICS_DISPOSITION: &str = "attachment; filename=\"calendar.ics\"";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Upstream credentials taken from request headers.
///
/// The Netology session and the Modeus bearer token are required. LMS is
/// enabled only when both `lxp-token` and `lxp-id` are present.
#[derive(Debug)]
pub struct CallerIdentity(pub Identity);

impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        let session = header_str(headers, NETOLOGY_SESSION_COOKIE).ok_or(
            EngineError::MissingCredential {
                header: NETOLOGY_SESSION_COOKIE,
            },
        )?;
        let token = header_str(headers, AUTHORIZATION.as_str())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(EngineError::MissingCredential {
                header: "authorization",
            })?;

        let mut identity = Identity::new(session, token);
        if let (Some(lms_token), Some(lms_id)) = (
            header_str(headers, LXP_TOKEN_HEADER),
            header_str(headers, LXP_ID_HEADER),
        ) {
            let user_id = lms_id
                .parse()
                .map_err(|_| ValidationError::invalid(LXP_ID_HEADER, "must be an integer"))?;
            identity = identity.with_lms(user_id, lms_token);
        }
        Ok(Self(identity))
    }
}

/// The caller's address as used by the rate limiter.
#[derive(Debug, Clone)]
pub struct ClientAddr(pub String);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self(client_ip(&parts.headers, peer)))
    }
}

/// Validates the body and query into an engine request and a display zone.
fn calendar_request(
    state: &AppState,
    identity: Identity,
    query: Result<Query<CalendarQuery>, QueryRejection>,
    body: Result<Json<WeekBody>, JsonRejection>,
) -> EngineResult<(CalendarRequest, TimezoneProjector)> {
    let Query(query) = query.map_err(|e| EngineError::BadRequest(e.body_text()))?;
    let Json(body) = body.map_err(|e| EngineError::BadRequest(e.body_text()))?;

    let window = body.window()?;
    let person_id = body.person_id()?.to_string();
    let zone = match query.time_zone.as_deref() {
        Some(zone) => TimezoneProjector::new(zone)?,
        None => state.default_zone,
    };

    let request = CalendarRequest {
        window,
        person_id,
        calendar_id: query.calendar_id.unwrap_or(state.default_calendar_id),
        page_size: body.size,
        identity,
    };
    Ok((request, zone))
}

/// `POST /api/v1/bulk/events/`
pub async fn get_events(
    State(state): State<AppState>,
    CallerIdentity(identity): CallerIdentity,
    query: Result<Query<CalendarQuery>, QueryRejection>,
    body: Result<Json<WeekBody>, JsonRejection>,
) -> EngineResult<Json<CalendarResponse>> {
    let (request, zone) = calendar_request(&state, identity, query, body)?;
    let snapshot = state.aggregator.get_calendar(&request, &zone).await?;
    Ok(Json(snapshot.into()))
}

/// `POST /api/v1/bulk/refresh_events/`
pub async fn refresh_events(
    State(state): State<AppState>,
    CallerIdentity(identity): CallerIdentity,
    query: Result<Query<CalendarQuery>, QueryRejection>,
    body: Result<Json<WeekBody>, JsonRejection>,
) -> EngineResult<Json<RefreshedCalendarResponse>> {
    let (request, zone) = calendar_request(&state, identity, query, body)?;
    let (snapshot, changed) = state.aggregator.refresh_calendar(&request, &zone).await?;
    Ok(Json(RefreshedCalendarResponse::new(snapshot, changed)))
}

/// `POST /api/v1/bulk/export_ics/`
pub async fn export_ics(
    State(state): State<AppState>,
    CallerIdentity(identity): CallerIdentity,
    query: Result<Query<CalendarQuery>, QueryRejection>,
    body: Result<Json<WeekBody>, JsonRejection>,
) -> EngineResult<impl IntoResponse> {
    let (request, zone) = calendar_request(&state, identity, query, body)?;
    let document = state.aggregator.export_ics(&request, &zone).await?;
    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static(ICS_CONTENT_TYPE)),
            (CONTENT_DISPOSITION, HeaderValue::from_static(ICS_DISPOSITION)),
        ],
        document,
    ))
}

async fn netology_sign_in(state: &AppState, credentials: &Credentials) -> EngineResult<NetologySession> {
    let key = state.tokens.key("netology", credentials);
    if let Some(session) = state.tokens.get::<NetologySession>(&key).await {
        return Ok(session);
    }

    let session = state.netology.sign_in(credentials).await?;
    if let Err(e) = state.tokens.set(&key, &session).await {
        warn!(error = %e, "failed to cache netology session");
    }
    Ok(session)
}

async fn lms_login(state: &AppState, credentials: &Credentials) -> EngineResult<LmsUser> {
    let key = state.tokens.key("lms", credentials);
    if let Some(user) = state.tokens.get::<LmsUser>(&key).await {
        return Ok(user);
    }

    let user = state.lms.login(credentials).await?;
    if let Err(e) = state.tokens.set(&key, &user).await {
        warn!(error = %e, "failed to cache lms token");
    }
    Ok(user)
}

/// `POST /api/v1/netology/auth`
pub async fn netology_auth(
    State(state): State<AppState>,
    ClientAddr(ip): ClientAddr,
    body: Result<Json<Credentials>, JsonRejection>,
) -> EngineResult<Json<NetologySession>> {
    let Json(credentials) = body.map_err(|e| EngineError::BadRequest(e.body_text()))?;
    let session = state
        .limiter
        .guarded(EndpointClass::NetologyLogin, &ip, || {
            netology_sign_in(&state, &credentials)
        })
        .await?;
    info!(ip = %ip, "netology login succeeded");
    Ok(Json(session))
}

/// `POST /api/v1/lms/auth`
pub async fn lms_auth(
    State(state): State<AppState>,
    ClientAddr(ip): ClientAddr,
    body: Result<Json<Credentials>, JsonRejection>,
) -> EngineResult<Json<LmsUser>> {
    let Json(credentials) = body.map_err(|e| EngineError::BadRequest(e.body_text()))?;
    let user = state
        .limiter
        .guarded(EndpointClass::LmsLogin, &ip, || lms_login(&state, &credentials))
        .await?;
    info!(ip = %ip, user_id = user.id, "lms login succeeded");
    Ok(Json(user))
}

/// `POST /api/v1/auth/tutor/login`
pub async fn tutor_login(
    State(state): State<AppState>,
    ClientAddr(ip): ClientAddr,
    body: Result<Json<TutorLogin>, JsonRejection>,
) -> EngineResult<Json<AccessToken>> {
    let Json(login) = body.map_err(|e| EngineError::BadRequest(e.body_text()))?;
    let token = state
        .limiter
        .guarded(EndpointClass::TutorLogin, &ip, || state.tutor.login(&login.password))
        .await?;
    info!(ip = %ip, "tutor login succeeded");
    Ok(Json(AccessToken::bearer(token)))
}

/// `POST /api/v1/mts/link`
pub async fn save_mts_link(
    State(state): State<AppState>,
    body: Result<Json<MtsLinkBody>, JsonRejection>,
) -> EngineResult<Json<StatusResponse>> {
    let Json(body) = body.map_err(|e| EngineError::BadRequest(e.body_text()))?;
    let url = body.link()?;
    state.links.save(body.lesson_id, &url).await?;
    info!(lesson_id = %body.lesson_id, "lesson link saved");
    Ok(Json(StatusResponse::ok()))
}

/// `GET /api/v1/mts/{lesson_id}`
pub async fn open_mts_link(
    State(state): State<AppState>,
    lesson_id: Result<Path<Uuid>, PathRejection>,
) -> EngineResult<Redirect> {
    let Path(lesson_id) = lesson_id.map_err(|e| EngineError::BadRequest(e.body_text()))?;
    let url = state
        .links
        .get(lesson_id)
        .await?
        .ok_or_else(|| EngineError::NotFound("URL for this lesson is not found".to_string()))?;
    Ok(Redirect::temporary(url.as_str()))
}

/// `GET /api/health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}
