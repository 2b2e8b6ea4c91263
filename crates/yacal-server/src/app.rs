use axum::Router;
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use yacal_protocol::API_PREFIX;

use crate::handlers::{
    export_ics, get_events, health, lms_auth, netology_auth, open_mts_link, refresh_events,
    save_mts_link, tutor_login,
};
use crate::state::AppState;

/// Create the application router with all routes and middleware.
pub fn create_app(state: AppState) -> Router {
    // Identity travels in custom headers, so any header is allowed.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/bulk/events/", post(get_events))
        .route("/bulk/refresh_events/", post(refresh_events))
        .route("/bulk/export_ics/", post(export_ics))
        .route("/netology/auth", post(netology_auth))
        .route("/lms/auth", post(lms_auth))
        .route("/auth/tutor/login", post(tutor_login))
        .route("/mts/link", post(save_mts_link))
        .route("/mts/{lesson_id}", get(open_mts_link))
        .layer(cors);

    let request_timeout = state.request_timeout;
    Router::new()
        .route("/api/health", get(health))
        .nest(API_PREFIX, api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .with_state(state)
}
