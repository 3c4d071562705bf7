use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::state::AppState;

/// Claims carried by a session token. Typed end to end; a token whose payload
/// does not deserialize into this shape is rejected at the decode boundary.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub iat: usize,
    pub exp: usize,
}

/// Expiry is separated from every other rejection for observability; both
/// surface as 401 at the HTTP layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
}

/// Signing and verification keys, built once from config at startup. Tokens
/// are stateless bearer credentials; there is no revocation, only expiry.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let cfg = &state.config.jwt;
        JwtKeys::new(&cfg.secret, Duration::days(cfg.ttl_days))
    }
}

impl JwtKeys {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Sign a token for the given subject, expiring a fixed TTL from now.
    pub fn issue(&self, user_id: Uuid) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + self.ttl;
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "session token issued");
        Ok(token)
    }

    /// Verify signature, algorithm and expiry, and extract the subject.
    /// Validation is pinned to HS256; a token declaring any other algorithm
    /// is invalid regardless of its signature.
    pub fn validate(&self, token: &str) -> Result<Uuid, TokenError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;
        Ok(data.claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys(secret: &str) -> JwtKeys {
        JwtKeys::new(secret, Duration::days(7))
    }

    #[test]
    fn issue_then_validate_returns_subject() {
        let keys = make_keys("dev-secret");
        let user_id = Uuid::new_v4();
        let token = keys.issue(user_id).expect("issue");
        assert_eq!(keys.validate(&token), Ok(user_id));
    }

    #[test]
    fn expired_token_is_distinguished() {
        // Negative TTL puts exp well past the default validation leeway.
        let keys = JwtKeys::new("dev-secret", Duration::hours(-2));
        let token = keys.issue(Uuid::new_v4()).expect("issue");
        assert_eq!(keys.validate(&token), Err(TokenError::Expired));
    }

    #[test]
    fn foreign_key_is_invalid() {
        let keys = make_keys("dev-secret");
        let other = make_keys("another-secret");
        let token = keys.issue(Uuid::new_v4()).expect("issue");
        assert_eq!(other.validate(&token), Err(TokenError::Invalid));
    }

    #[test]
    fn garbage_is_invalid() {
        let keys = make_keys("dev-secret");
        assert_eq!(keys.validate("not.a.token"), Err(TokenError::Invalid));
        assert_eq!(keys.validate(""), Err(TokenError::Invalid));
    }

    #[test]
    fn wrong_algorithm_is_invalid() {
        let keys = make_keys("dev-secret");
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: Uuid::new_v4(),
            iat: now.unix_timestamp() as usize,
            exp: (now + Duration::days(1)).unix_timestamp() as usize,
        };
        // Same secret, different declared algorithm.
        let token = encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(b"dev-secret"),
        )
        .expect("encode");
        assert_eq!(keys.validate(&token), Err(TokenError::Invalid));
    }

    #[test]
    fn missing_subject_is_invalid() {
        let keys = make_keys("dev-secret");
        let exp = (OffsetDateTime::now_utc() + Duration::days(1)).unix_timestamp();
        let token = encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({ "exp": exp }),
            &EncodingKey::from_secret(b"dev-secret"),
        )
        .expect("encode");
        assert_eq!(keys.validate(&token), Err(TokenError::Invalid));
    }
}
