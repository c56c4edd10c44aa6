use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use tracing::debug;

use super::jwt::JwtKeys;
use crate::{
    error::{AppError, AuthError},
    state::AppState,
    users::{model::User, repo::UserStore},
};

/// Pulls the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Extract, verify, resolve. The store is only consulted once the token checks out.
pub async fn authenticate(
    headers: &HeaderMap,
    keys: &JwtKeys,
    users: &dyn UserStore,
) -> Result<User, AppError> {
    let token = bearer_token(headers).ok_or(AuthError::NoToken)?;
    let claims = keys.verify(token)?;
    let user = users
        .find_by_id(claims.sub)
        .await?
        .ok_or(AuthError::UnknownSubject)?;
    debug!(user_id = %user.id, "request authorized");
    Ok(user)
}

/// The live user behind the request's bearer token.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        authenticate(&parts.headers, &state.keys, state.users.as_ref())
            .await
            .map(CurrentUser)
    }
}
