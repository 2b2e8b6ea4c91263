//! The [`UpstreamFetcher`] trait and the request types handed to it.
//!
//! A fetcher owns one upstream: it talks HTTP, applies the retry policy,
//! and hands back already-normalized events. The aggregation engine never
//! sees an upstream's wire shape.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use yacal_core::{NormalizedEvent, TimeWindow};

use crate::error::ProviderResult;

/// A boxed future for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The upstreams a snapshot is assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Upstream {
    Netology,
    Modeus,
    Lms,
}

impl Upstream {
    pub const ALL: [Upstream; 3] = [Upstream::Netology, Upstream::Modeus, Upstream::Lms];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Netology => "netology",
            Self::Modeus => "modeus",
            Self::Lms => "lms",
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque bearer material for one upstream.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Value of the `_netology-on-rails_session` cookie.
    NetologySession(String),
    /// A bearer token sent in the `Authorization` header.
    Bearer(String),
    /// Moodle web-service token plus the numeric user id it belongs to.
    LmsToken { user_id: i64, token: String },
}

impl Credential {
    /// Short label used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NetologySession(_) => "session cookie",
            Self::Bearer(_) => "bearer token",
            Self::LmsToken { .. } => "lms token",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetologySession(_) => f.write_str("NetologySession(<redacted>)"),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Self::LmsToken { user_id, .. } => f
                .debug_struct("LmsToken")
                .field("user_id", user_id)
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// The credentials a caller presented, one slot per upstream.
///
/// Netology and Modeus are mandatory; LMS is optional and its fetcher is
/// skipped when the slot is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub netology: Credential,
    pub modeus: Credential,
    pub lms: Option<Credential>,
}

impl Identity {
    pub fn new(netology_session: impl Into<String>, modeus_token: impl Into<String>) -> Self {
        Self {
            netology: Credential::NetologySession(netology_session.into()),
            modeus: Credential::Bearer(modeus_token.into()),
            lms: None,
        }
    }

    pub fn with_lms(mut self, user_id: i64, token: impl Into<String>) -> Self {
        self.lms = Some(Credential::LmsToken {
            user_id,
            token: token.into(),
        });
        self
    }

    /// The credential for `upstream`, if the caller supplied one.
    pub fn credential_for(&self, upstream: Upstream) -> Option<&Credential> {
        match upstream {
            Upstream::Netology => Some(&self.netology),
            Upstream::Modeus => Some(&self.modeus),
            Upstream::Lms => self.lms.as_ref(),
        }
    }
}

/// Everything a fetcher needs for one call.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub window: TimeWindow,
    pub person_id: String,
    pub calendar_id: i64,
    pub page_size: u32,
    pub credential: Credential,
}

/// A source of normalized events for one upstream.
///
/// Implementations must be cancel-safe: the engine drops in-flight fetches
/// as soon as a sibling fails.
pub trait UpstreamFetcher: Send + Sync {
    /// Which upstream this fetcher talks to.
    fn upstream(&self) -> Upstream;

    /// Fetches and normalizes every event of `request.window`.
    fn fetch<'a>(
        &'a self,
        request: &'a FetchRequest,
    ) -> BoxFuture<'a, ProviderResult<Vec<NormalizedEvent>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_is_redacted() {
        let cookie = Credential::NetologySession("secret-cookie".into());
        let bearer = Credential::Bearer("secret-jwt".into());
        let lms = Credential::LmsToken {
            user_id: 42,
            token: "secret-token".into(),
        };

        for (credential, secret) in [
            (cookie, "secret-cookie"),
            (bearer, "secret-jwt"),
            (lms, "secret-token"),
        ] {
            let debug = format!("{credential:?}");
            assert!(!debug.contains(secret), "{debug} leaks {secret}");
        }
    }

    #[test]
    fn lms_debug_keeps_user_id() {
        let lms = Credential::LmsToken {
            user_id: 42,
            token: "t".into(),
        };
        assert!(format!("{lms:?}").contains("42"));
    }

    #[test]
    fn identity_slots() {
        let identity = Identity::new("cookie", "jwt");
        assert_eq!(
            identity.credential_for(Upstream::Netology),
            Some(&Credential::NetologySession("cookie".into()))
        );
        assert_eq!(
            identity.credential_for(Upstream::Modeus),
            Some(&Credential::Bearer("jwt".into()))
        );
        assert_eq!(identity.credential_for(Upstream::Lms), None);

        let identity = identity.with_lms(7, "moodle");
        assert!(matches!(
            identity.credential_for(Upstream::Lms),
            Some(Credential::LmsToken { user_id: 7, .. })
        ));
    }

    #[test]
    fn upstream_names() {
        let names: Vec<_> = Upstream::ALL.iter().map(Upstream::to_string).collect();
        assert_eq!(names, ["netology", "modeus", "lms"]);
    }
}
