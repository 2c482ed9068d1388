//! Verification of bearer tokens issued by the external auth provider.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("token subject is not a user id")]
    BadSubject,
}

/// Claims we rely on. Providers add more; they are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

/// Verify an HS256 token and return the user id carried in `sub`.
pub fn verify(token: &str, secret: &[u8]) -> Result<Uuid, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;

    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Uuid::parse_str(&data.claims.sub).map_err(|_| TokenError::BadSubject)
}

/// Mint a token for `user_id`. Used by tooling and tests; production tokens come from the provider.
pub fn issue(user_id: Uuid, secret: &[u8], ttl_secs: i64) -> Result<String, TokenError> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: chrono::Utc::now().timestamp() + ttl_secs,
    };
    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )?)
}
