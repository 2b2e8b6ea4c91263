//! Shared state handed to every request handler.

use std::sync::Arc;
use std::time::Duration;

use yacal_core::TimezoneProjector;
use yacal_providers::{LmsClient, ModeusClient, NetologyClient, ProviderError, UpstreamFetcher};

use crate::aggregator::Aggregator;
use crate::cache::{ContentCache, TokenCache};
use crate::config::{AppConfig, ConfigError};
use crate::links::LinkStore;
use crate::ratelimit::RateLimiter;
use crate::store::KeyValueStore;
use crate::tutor::TutorAuth;

/// Everything the HTTP layer needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub limiter: Arc<RateLimiter>,
    pub tokens: TokenCache,
    pub links: LinkStore,
    pub tutor: Arc<TutorAuth>,
    pub netology: NetologyClient,
    pub lms: LmsClient,
    /// Program calendar used when a request names none.
    pub default_calendar_id: i64,
    /// Zone responses are projected into when a request names none.
    pub default_zone: TimezoneProjector,
    /// Bound on a whole HTTP request.
    pub request_timeout: Duration,
}

impl AppState {
    /// Wires clients, caches and the limiter from a validated config.
    ///
    /// The caches, the link store and the rate limiter all share `store`.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, ConfigError> {
        let http = config.upstream.http();
        let client_error = |e: ProviderError| ConfigError::Invalid(format!("upstream client: {e}"));

        let netology = NetologyClient::new(&config.netology.base_url, &http).map_err(client_error)?;
        let modeus = ModeusClient::new(&config.modeus.base_url, &http).map_err(client_error)?;
        let lms = LmsClient::new(&config.lms.base_url, config.lms.service.clone(), &http)
            .map_err(client_error)?;

        let fetchers: Vec<Arc<dyn UpstreamFetcher>> = vec![
            Arc::new(netology.clone()),
            Arc::new(modeus),
            Arc::new(lms.clone()),
        ];
        let aggregator = Aggregator::new(
            fetchers,
            ContentCache::new(store.clone(), config.cache.events_ttl()),
            config.cache.prefix.clone(),
        )
        .with_fan_out_timeout(config.upstream.fan_out_timeout())
        .with_single_flight(config.cache.single_flight);

        let limiter = RateLimiter::new(
            store.clone(),
            config.cache.prefix.clone(),
            config.rate_limit.max_attempts,
            config.rate_limit.lockout(),
        );
        let tokens = TokenCache::new(
            store.clone(),
            config.cache.prefix.clone(),
            config.cache.token_ttl(),
        );
        let links = LinkStore::new(store, config.cache.prefix.clone(), config.cache.events_ttl());

        let default_zone = TimezoneProjector::new(&config.default_time_zone)
            .map_err(|e| ConfigError::Invalid(format!("default_time_zone: {e}")))?;

        Ok(Self {
            aggregator: Arc::new(aggregator),
            limiter: Arc::new(limiter),
            tokens,
            links,
            tutor: Arc::new(TutorAuth::new(&config.tutor)),
            netology,
            lms,
            default_calendar_id: config.netology.default_calendar_id,
            default_zone,
            request_timeout: Duration::from_secs(config.server.request_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn builds_from_default_config() {
        let state = AppState::from_config(&AppConfig::default(), Arc::new(MemoryStore::new())).unwrap();
        assert_eq!(state.default_calendar_id, 45526);
        assert_eq!(
            state.default_zone,
            TimezoneProjector::new("Europe/Moscow").unwrap()
        );
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let mut config = AppConfig::default();
        config.modeus.base_url = "not a url".to_string();
        let result = AppState::from_config(&config, Arc::new(MemoryStore::new()));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
