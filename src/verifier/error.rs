//! Reasons a token is rejected.
//!
//! The `Display` text of each variant is what ends up after
//! `Invalid token: ` in the 401 body, so it is written for the operator
//! reading nginx's error log, not for the end user.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum VerifyError {
    /// The token is not a well-formed compact JWS.
    #[error("malformed jwt: {0}")]
    Malformed(String),

    /// The header names an algorithm outside the accepted set.
    #[error("unsupported signing algorithm {0:?}")]
    UnsupportedAlgorithm(jsonwebtoken::Algorithm),

    /// The key set holds no key with the token's `kid`, even after a refresh.
    #[error("no signing key found for kid {0:?}")]
    UnknownKey(Option<String>),

    /// A key in the set could not be turned into a verification key.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    /// The key set could not be fetched or parsed.
    #[error("failed to fetch signing keys: {0}")]
    KeySet(String),

    #[error("failed to verify signature")]
    Signature,

    #[error("token issued by a different provider, expected {expected:?}")]
    Issuer { expected: String },

    #[error("token audience does not include {expected:?}")]
    Audience { expected: String },

    #[error("token is expired")]
    Expired,

    #[error("token is not valid yet")]
    NotYetValid,

    #[error("token is missing required claim {0:?}")]
    MissingClaim(String),

    /// Anything else `jsonwebtoken` reports.
    #[error("{0}")]
    Other(String),
}
