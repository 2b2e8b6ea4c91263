//! Tutor sign-in.
//!
//! Tutors share one password, stored only as a bcrypt hash. A correct
//! password is answered with an HS256 token whose subject is `tutor`.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::clock::{Clock, SystemClock};
use crate::config::TutorSettings;
use crate::error::{EngineError, EngineResult};

/// Subject every tutor token carries.
pub const TUTOR_SUBJECT: &str = "tutor";

const NOT_CONFIGURED: &str = "Tutor authentication not configured";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TutorClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Checks the tutor password and issues tokens.
#[derive(Clone)]
pub struct TutorAuth {
    password_hash: Option<Arc<str>>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TutorAuth {
    pub fn new(settings: &TutorSettings) -> Self {
        let secret = settings.secret_key.as_bytes();
        Self {
            password_hash: settings.password_hash().map(Arc::from),
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl: settings.token_ttl(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Verifies `password` and returns a fresh token.
    ///
    /// Fails with [`EngineError::NotConfigured`] when no hash is set and
    /// with [`EngineError::InvalidPassword`] on a mismatch.
    pub async fn login(&self, password: &str) -> EngineResult<String> {
        let hash = self
            .password_hash
            .clone()
            .ok_or(EngineError::NotConfigured(NOT_CONFIGURED))?;

        let password = password.to_owned();
        let matched = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| EngineError::Internal(format!("password check aborted: {e}")))?
            .map_err(|e| {
                error!(error = %e, "tutor password hash is unusable");
                EngineError::Internal(format!("tutor password hash: {e}"))
            })?;

        if !matched {
            return Err(EngineError::InvalidPassword);
        }
        self.issue_token()
    }

    pub fn issue_token(&self) -> EngineResult<String> {
        let now = self.clock.now().timestamp();
        let claims = TutorClaims {
            sub: TUTOR_SUBJECT.to_string(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| EngineError::Internal(format!("failed to sign tutor token: {e}")))
    }

    /// Decodes a token issued by [`issue_token`](Self::issue_token).
    ///
    /// Expiry is checked against this instance's clock.
    pub fn verify_token(&self, token: &str) -> EngineResult<TutorClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<TutorClaims>(token, &self.decoding, &validation)
            .map_err(|e| EngineError::InvalidToken(e.to_string()))?
            .claims;
        if claims.sub != TUTOR_SUBJECT {
            debug!(sub = %claims.sub, "token subject is not a tutor");
            return Err(EngineError::InvalidToken(format!("unexpected subject {}", claims.sub)));
        }
        if claims.exp <= self.clock.now().timestamp() {
            return Err(EngineError::InvalidToken("token expired".to_string()));
        }
        Ok(claims)
    }
}
