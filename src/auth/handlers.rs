use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};

use super::{
    dto::{AuthResponse, CallbackQuery, LoginRequest, RegisterRequest},
    extractors::CurrentUser,
    services,
};
use crate::{error::AppError, state::AppState, users::model::PublicUser};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/github/callback", get(github_callback))
        .route("/auth/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    services::register(&state, payload).await.map(Json)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    services::login(&state, payload).await.map(Json)
}

/// Always answers with a redirect, never a JSON error body.
#[instrument(skip_all)]
pub async fn github_callback(
    State(state): State<AppState>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> Redirect {
    let frontend = &state.config.frontend_url;
    let failure = |code: &str| Redirect::to(&format!("{frontend}/login?error={code}"));

    let query = match query {
        Ok(Query(query)) => query,
        Err(e) => {
            warn!(error = %e, "malformed github callback query");
            return failure("github_auth_failed");
        }
    };

    if let Some(error) = query.error.as_deref() {
        warn!(error, "github reported an authorization error");
        return failure("github_auth_failed");
    }
    let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
        warn!("github callback without code");
        return failure("missing_code");
    };

    match services::complete_github_login(&state, code).await {
        Ok(token) => Redirect::to(&format!("{frontend}/auth/callback?token={token}")),
        Err(e) => {
            warn!(error = %e, "github login failed");
            failure("github_auth_failed")
        }
    }
}

#[instrument(skip_all)]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(user.into())
}
