//! Access-token verification.
//!
//! The pipeline only knows the [`TokenVerifier`] capability. The production
//! implementation, [`IdTokenVerifier`], checks a compact JWS against the
//! identity provider's published keys:
//!
//! 1. header decodes and names an accepted algorithm
//! 2. a key with the header's `kid` exists (refreshing the set if not)
//! 3. the signature verifies under that key
//! 4. `iss` is the auth domain, `aud` includes the audience
//! 5. `exp` has not passed and `nbf` has, within the configured leeway

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;

mod error;
mod key_set;

pub use error::VerifyError;
pub use key_set::{DEFAULT_CACHE_TTL, DEFAULT_MIN_REFRESH_INTERVAL, RemoteKeySet};

/// Signature algorithms accepted unless configured otherwise.
///
/// Cloudflare Access signs with RS256.
pub const DEFAULT_ALGORITHMS: &[Algorithm] = &[Algorithm::RS256, Algorithm::ES256];

/// Clock skew tolerated on `exp` and `nbf`.
pub const DEFAULT_LEEWAY_SECS: u64 = 60;

/// Decides whether a raw token string is acceptable.
///
/// Dropping the returned future abandons verification, including any key
/// fetch it started.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Claims, VerifyError>;
}

/// Claims of a verified token.
///
/// Only the registered claims are typed; provider-specific ones (Cloudflare
/// adds `type`, `identity_nonce`, `country`, …) land in `extra`.
///
/// `iss` and `exp` are optional here so that a token lacking them reaches
/// `Validation`'s required-claim check and is reported as
/// [`VerifyError::MissingClaim`]. On a verified token both are present.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub iss: Option<String>,
    // string or array; `Validation` already checked it
    #[serde(default)]
    pub aud: serde_json::Value,
    #[serde(default)]
    pub exp: Option<u64>,
    #[serde(default)]
    pub nbf: Option<u64>,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Verifies ID/access tokens issued by one provider for one audience.
///
/// Immutable after construction; share it across requests behind an `Arc`.
#[derive(Debug)]
pub struct IdTokenVerifier {
    issuer: String,
    audience: String,
    keys: Arc<RemoteKeySet>,
    algorithms: Vec<Algorithm>,
    leeway: u64,
}

impl IdTokenVerifier {
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>, keys: Arc<RemoteKeySet>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            keys,
            algorithms: DEFAULT_ALGORITHMS.to_vec(),
            leeway: DEFAULT_LEEWAY_SECS,
        }
    }

    pub fn with_algorithms(mut self, algorithms: impl Into<Vec<Algorithm>>) -> Self {
        self.algorithms = algorithms.into();
        self
    }

    pub fn with_leeway(mut self, secs: u64) -> Self {
        self.leeway = secs;
        self
    }

    pub fn issuer(&self) -> &str { &self.issuer }
    pub fn audience(&self) -> &str { &self.audience }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = self.leeway;
        validation
    }

    fn map_error(&self, e: jsonwebtoken::errors::Error) -> VerifyError {
        match e.kind() {
            ErrorKind::InvalidSignature => VerifyError::Signature,
            ErrorKind::ExpiredSignature => VerifyError::Expired,
            ErrorKind::ImmatureSignature => VerifyError::NotYetValid,
            ErrorKind::InvalidIssuer => VerifyError::Issuer { expected: self.issuer.clone() },
            ErrorKind::InvalidAudience => VerifyError::Audience { expected: self.audience.clone() },
            ErrorKind::MissingRequiredClaim(claim) => VerifyError::MissingClaim(claim.clone()),
            ErrorKind::InvalidAlgorithm => {
                VerifyError::InvalidKey("key type does not match token algorithm".to_owned())
            }
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                VerifyError::Malformed(e.to_string())
            }
            _ => VerifyError::Other(e.to_string()),
        }
    }
}

#[async_trait]
impl TokenVerifier for IdTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Claims, VerifyError> {
        let header = jsonwebtoken::decode_header(token).map_err(|e| VerifyError::Malformed(e.to_string()))?;
        if !self.algorithms.contains(&header.alg) {
            return Err(VerifyError::UnsupportedAlgorithm(header.alg));
        }

        let candidates = self.keys.keys_for(header.kid.as_deref()).await?;
        let validation = self.validation(header.alg);

        // Without a `kid` every key is a candidate; only a signature or
        // key-type mismatch moves on to the next one.
        let mut last = VerifyError::Signature;
        for jwk in &candidates {
            let key = match DecodingKey::from_jwk(jwk) {
                Ok(key) => key,
                Err(e) => {
                    last = VerifyError::InvalidKey(e.to_string());
                    continue;
                }
            };
            match jsonwebtoken::decode::<Claims>(token, &key, &validation) {
                Ok(data) => {
                    debug!(sub = ?data.claims.sub, kid = ?header.kid, "token verified");
                    return Ok(data.claims);
                }
                Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm) => {
                    last = self.map_error(e);
                }
                Err(e) => return Err(self.map_error(e)),
            }
        }
        Err(last)
    }
}
