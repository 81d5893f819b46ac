//! Authenticated-user extractor.
//!
//! Resolves the `session_id` cookie through the session resolver before the
//! handler body runs, so unauthenticated requests never reach a store.

use crate::{errors::AppError, models::file::UserId, state::AppState};
use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::CookieJar;

pub const SESSION_COOKIE: &str = "session_id";

/// The caller's identity, resolved from their session.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = CookieJar::from_headers(&parts.headers)
            .get(SESSION_COOKIE)
            .map(|cookie| cookie.value().to_owned())
            .ok_or_else(AppError::unauthorized)?;

        state
            .sessions
            .resolve_identity(&token)
            .await
            .map(AuthUser)
            .ok_or_else(AppError::unauthorized)
    }
}
