//! Server configuration.
//!
//! Everything lives in one TOML file; every key is optional:
//!
//! ```toml
//! default_time_zone = "Europe/Moscow"
//!
//! [server]
//! port = 8000
//!
//! [store]
//! backend = "redis"
//! redis_url = "redis://localhost:6379"
//!
//! [rate_limit]
//! max_attempts = 5
//! lockout_secs = 900
//!
//! [tutor]
//! password_hash = "$2b$12$..."
//! secret_key = "change-me"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use yacal_core::{TimezoneProjector, TracingOutputFormat};
use yacal_providers::{HttpSettings, RetryPolicy, lms, modeus, netology};

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub cache: CacheSettings,
    pub store: StoreSettings,
    pub rate_limit: RateLimitSettings,
    pub upstream: UpstreamSettings,
    pub netology: NetologySettings,
    pub modeus: ModeusSettings,
    pub lms: LmsSettings,
    pub tutor: TutorSettings,
    /// IANA zone responses are projected into when the caller names none.
    pub default_time_zone: String,
    pub logging: LoggingSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            cache: CacheSettings::default(),
            store: StoreSettings::default(),
            rate_limit: RateLimitSettings::default(),
            upstream: UpstreamSettings::default(),
            netology: NetologySettings::default(),
            modeus: ModeusSettings::default(),
            lms: LmsSettings::default(),
            tutor: TutorSettings::default(),
            default_time_zone: "Europe/Moscow".to_string(),
            logging: LoggingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Namespace prepended to every store key.
    pub prefix: String,
    /// Lifetime of a cached calendar snapshot.
    pub events_ttl_secs: u64,
    /// Lifetime of a cached login result.
    pub token_ttl_secs: u64,
    /// Collapse concurrent cache misses for the same key into one fetch.
    pub single_flight: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            prefix: "yacal".to_string(),
            events_ttl_secs: 14 * 24 * 3600,
            token_ttl_secs: 12 * 3600,
            single_flight: true,
        }
    }
}

impl CacheSettings {
    pub fn events_ttl(&self) -> Duration {
        Duration::from_secs(self.events_ttl_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub redis_url: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_attempts: u32,
    pub lockout_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_secs: 900,
        }
    }
}

impl RateLimitSettings {
    pub fn lockout(&self) -> Duration {
        Duration::from_secs(self.lockout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// Per-call HTTP timeout.
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
    /// Bound on a whole fan-out, retries included.
    pub fan_out_timeout_secs: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            retry_attempts: 5,
            retry_delay_secs: 3,
            fan_out_timeout_secs: 45,
        }
    }
}

impl UpstreamSettings {
    pub fn http(&self) -> HttpSettings {
        HttpSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            retry: RetryPolicy::new(
                self.retry_attempts,
                Duration::from_secs(self.retry_delay_secs),
            ),
            ..HttpSettings::default()
        }
    }

    pub fn fan_out_timeout(&self) -> Duration {
        Duration::from_secs(self.fan_out_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetologySettings {
    pub base_url: String,
    /// Program calendar used when a request names none.
    pub default_calendar_id: i64,
}

impl Default for NetologySettings {
    fn default() -> Self {
        Self {
            base_url: netology::DEFAULT_BASE_URL.to_string(),
            default_calendar_id: 45526,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeusSettings {
    pub base_url: String,
}

impl Default for ModeusSettings {
    fn default() -> Self {
        Self {
            base_url: modeus::DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LmsSettings {
    pub base_url: String,
    /// Moodle web-service name passed to `token.php`.
    pub service: String,
}

impl Default for LmsSettings {
    fn default() -> Self {
        Self {
            base_url: lms::DEFAULT_BASE_URL.to_string(),
            service: lms::DEFAULT_SERVICE.to_string(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorSettings {
    /// bcrypt hash of the shared tutor password. Tutor login answers 500
    /// while this is unset or empty.
    pub password_hash: Option<String>,
    /// HS256 key tutor tokens are signed with.
    pub secret_key: String,
    pub token_ttl_secs: u64,
}

impl Default for TutorSettings {
    fn default() -> Self {
        Self {
            password_hash: None,
            secret_key: String::new(),
            token_ttl_secs: 30 * 24 * 3600,
        }
    }
}

impl TutorSettings {
    /// The stored hash, if tutor login is enabled.
    pub fn password_hash(&self) -> Option<&str> {
        self.password_hash
            .as_deref()
            .map(str::trim)
            .filter(|hash| !hash.is_empty())
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

impl std::fmt::Debug for TutorSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TutorSettings")
            .field("password_hash", &self.password_hash().map(|_| "<redacted>"))
            .field("secret_key", &"<redacted>")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive; `RUST_LOG` wins when unset.
    pub level: Option<String>,
    pub format: Option<String>,
}

impl LoggingSettings {
    /// The configured output format, if any.
    pub fn output_format(&self) -> Result<Option<TracingOutputFormat>, ConfigError> {
        self.format
            .as_deref()
            .map(|format| format.parse().map_err(ConfigError::Invalid))
            .transpose()
    }
}

impl AppConfig {
    /// Loads `path` if given, otherwise falls back to the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => Ok(Self::default()),
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.events_ttl_secs == 0 {
            return Err(ConfigError::invalid("cache.events_ttl_secs must be positive"));
        }
        if self.cache.token_ttl_secs == 0 {
            return Err(ConfigError::invalid("cache.token_ttl_secs must be positive"));
        }
        if self.rate_limit.max_attempts == 0 {
            return Err(ConfigError::invalid("rate_limit.max_attempts must be positive"));
        }
        if self.rate_limit.lockout_secs == 0 {
            return Err(ConfigError::invalid("rate_limit.lockout_secs must be positive"));
        }
        if self.upstream.retry_attempts == 0 {
            return Err(ConfigError::invalid("upstream.retry_attempts must be positive"));
        }
        if self.tutor.token_ttl_secs == 0 {
            return Err(ConfigError::invalid("tutor.token_ttl_secs must be positive"));
        }
        if self.tutor.password_hash().is_some() && self.tutor.secret_key.is_empty() {
            return Err(ConfigError::invalid(
                "tutor.secret_key is required when tutor.password_hash is set",
            ));
        }
        TimezoneProjector::new(&self.default_time_zone)
            .map_err(|e| ConfigError::invalid(format!("default_time_zone: {e}")))?;
        self.logging.output_format()?;
        Ok(())
    }

    /// Address the HTTP listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
