//! Inspection of Crowd Control auth tokens.
//!
//! Tokens are JWTs signed by the broker. The client cannot verify the
//! signature and does not need to: it only reads the claims to refuse a
//! token that is clearly stale before opening a connection with it.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;

use crate::utils::error::AuthError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    pub exp: i64,
    #[serde(rename = "ccUID", default)]
    pub cc_uid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub jti: Option<String>,
}

/// Read the claims of `token` without checking its signature.
///
/// Returns `None` for anything that is not a JWT with an `exp` claim.
pub fn inspect(token: &str) -> Option<TokenClaims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims)
}

/// Fail with `AuthError::TokenExpired` when the token's grace period is over.
pub fn check_expiry(token: &str, now: DateTime<Utc>) -> Result<Option<TokenClaims>, AuthError> {
    let Some(claims) = inspect(token) else {
        return Ok(None);
    };

    let expired = DateTime::<Utc>::from_timestamp(claims.exp, 0)
        // tokens stay usable for a day past their `exp` claim
        .map(|exp| exp + Duration::days(1) < now)
        .unwrap_or(false);

    if expired {
        return Err(AuthError::TokenExpired {
            expired_at: claims.exp,
        });
    }

    Ok(Some(claims))
}
