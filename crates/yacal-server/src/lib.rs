//! HTTP service: aggregation engine, caches, rate limiting and routes.
//!
//! This crate provides the yacal server that:
//! - Fans a week query out to Netology, Modeus and LMS concurrently
//! - Caches merged snapshots in a shared key-value store
//! - Reports whether a forced refresh changed the calendar
//! - Locks out clients that keep failing to log in
//! - Signs tutors in and keeps the webinar links they attach to lessons
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use yacal_server::{AppConfig, AppState, MemoryStore, create_app};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::default();
//!     let state = AppState::from_config(&config, Arc::new(MemoryStore::new()))?;
//!     let listener = tokio::net::TcpListener::bind(config.listen_addr()).await?;
//!     axum::serve(listener, create_app(state)).await?;
//!     Ok(())
//! }
//! ```

mod aggregator;
mod app;
mod cache;
mod cli;
mod clock;
mod config;
mod error;
mod handlers;
mod links;
mod ratelimit;
mod signals;
mod state;
mod store;
mod tutor;

pub use aggregator::{Aggregator, CalendarRequest, DEFAULT_FAN_OUT_TIMEOUT};
pub use app::create_app;
pub use cache::{CacheError, CacheKey, ContentCache, TokenCache};
pub use cli::Cli;
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{AppConfig, ConfigError, StoreBackend, TutorSettings};
pub use error::{EngineError, EngineResult};
pub use handlers::{LXP_ID_HEADER, LXP_TOKEN_HEADER};
pub use links::LinkStore;
pub use ratelimit::{EndpointClass, RateLimitRecord, RateLimiter, client_ip};
pub use signals::SignalHandler;
pub use state::AppState;
pub use store::{KeyValueStore, MemoryStore, StoreError, StoreResult, open_store};
pub use tutor::{TUTOR_SUBJECT, TutorAuth, TutorClaims};
#[cfg(feature = "redis")]
pub use store::RedisStore;
