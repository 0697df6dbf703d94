use crate::{errors::AppError, state::AppState};
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

/// The user a request's bearer token was issued to.
///
/// Extracted from headers only, so it can precede a body extractor and
/// reject the request before any of the body is read.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = state.auth.authenticate(&parts.headers)?;
        Ok(Self(user))
    }
}
