//! Upstream fetchers and login clients.
//!
//! - [`UpstreamFetcher`] - the trait every upstream implements
//! - [`NetologyClient`], [`ModeusClient`], [`LmsClient`] - concrete upstreams
//! - [`normalize`] - pure mapping of upstream payloads to normalized events
//! - [`ProviderError`] - error type shared by all of the above
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │ Netology │   │  Modeus  │   │   LMS    │
//! └────┬─────┘   └────┬─────┘   └────┬─────┘
//!      │   UpstreamClient (retry)    │
//!      ▼              ▼              ▼
//! ┌─────────────────────────────────────────┐
//! │     normalize::{netology,modeus,lms}    │
//! └────────────────────┬────────────────────┘
//!                      ▼
//!              Vec<NormalizedEvent>
//! ```

pub mod error;
pub mod fetcher;
pub mod http;
pub mod lms;
pub mod modeus;
pub mod netology;
pub mod normalize;
pub mod retry;
mod serde_time;

pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use fetcher::{BoxFuture, Credential, FetchRequest, Identity, Upstream, UpstreamFetcher};
pub use http::{HttpSettings, UpstreamClient};
pub use lms::LmsClient;
pub use modeus::ModeusClient;
pub use netology::NetologyClient;
pub use retry::{RetryPolicy, retry_transport};
