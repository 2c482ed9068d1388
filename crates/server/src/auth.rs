//! Bearer token extractors. Tokens are issued by the auth provider; we only verify them.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::debug;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// The caller's user id when a valid token is present. A missing header means
/// anonymous; a present but invalid token is rejected.
pub struct MaybeUser(pub Option<Uuid>);

/// Like `MaybeUser`, but anonymous callers are rejected with 401
pub struct RequireUser(pub Uuid);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Ok(MaybeUser(None));
        };
        let token = header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ApiError::Unauthorized("malformed authorization header"))?;

        let user_id = utils::jwt::verify(token, state.config.jwt_secret.as_bytes()).map_err(|e| {
            debug!(error = %e, "Rejected bearer token");
            ApiError::Unauthorized("invalid or expired token")
        })?;
        Ok(MaybeUser(Some(user_id)))
    }
}

impl FromRequestParts<AppState> for RequireUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let MaybeUser(user) = MaybeUser::from_request_parts(parts, state).await?;
        user.map(RequireUser)
            .ok_or(ApiError::Unauthorized("sign in required"))
    }
}
