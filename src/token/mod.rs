//! Session bearer tokens: RS256 JWTs verified against the identity provider's
//! published key set.

mod jwks;
mod jwt;

pub use jwks::{Jwk, Jwks};
pub use jwt::{peek_claims, sign_rs256, verify_rs256, Claims, Error, TokenHeader, ALG_RS256};

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use utoipa::ToSchema;

/// Authenticated identity decoded from verified claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Principal {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            email: claims.email,
            name: claims.name,
            issued_at: claims.iat,
            expires_at: claims.exp,
        }
    }
}

/// Current wall-clock time as unix seconds, saturating on clock errors.
#[must_use]
pub fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
