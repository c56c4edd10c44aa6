use tracing::{info, instrument, warn};

use super::{
    dto::{AuthResponse, LoginRequest, RegisterRequest},
    github::IdentityProvider,
    password::{hash_password_blocking, verify_dummy_blocking, verify_password_blocking},
    reconcile::reconcile,
};
use crate::{
    error::{AppError, AuthError},
    state::AppState,
    users::{model::NewUser, repo::UserStore},
    validation::{self, normalize_email},
};

#[instrument(skip_all)]
pub async fn register(state: &AppState, req: RegisterRequest) -> Result<AuthResponse, AppError> {
    let username = req.username.trim().to_string();
    let email = normalize_email(&req.email);
    validation::collect([
        validation::check_username(&username),
        validation::check_email(&email),
        validation::check_password(&req.password),
    ])?;

    if state.users.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::Conflict("email".into()));
    }

    let password = hash_password_blocking(req.password).await?;
    let user = state
        .users
        .create(NewUser {
            username,
            email,
            password: Some(password),
            avatar: None,
            github_id: None,
        })
        .await?;

    let token = state.keys.sign(user.id)?;
    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(AuthResponse {
        token,
        user: user.into(),
    })
}

#[instrument(skip_all)]
pub async fn login(state: &AppState, req: LoginRequest) -> Result<AuthResponse, AppError> {
    let email = normalize_email(&req.email);
    if !validation::is_valid_email(&email) {
        return Err(AppError::invalid("email", "must be a valid email address"));
    }

    let Some(user) = state.users.find_by_email(&email).await? else {
        verify_dummy_blocking(req.password).await;
        warn!(email = %email, "login unknown email");
        return Err(AuthError::InvalidCredentials.into());
    };

    // OAuth-only accounts have nothing to compare against.
    let Some(hash) = user.password_hash.clone() else {
        verify_dummy_blocking(req.password).await;
        warn!(user_id = %user.id, "password login attempted on oauth-only account");
        return Err(AuthError::InvalidCredentials.into());
    };

    if !verify_password_blocking(req.password, hash).await? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AuthError::InvalidCredentials.into());
    }

    let token = state.keys.sign(user.id)?;
    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(AuthResponse {
        token,
        user: user.into(),
    })
}

/// Code → provider token → profile → local user → our token.
#[instrument(skip_all)]
pub async fn complete_github_login(state: &AppState, code: &str) -> Result<String, AppError> {
    let access_token = state.identity.exchange_code(code).await?;
    let profile = state.identity.fetch_profile(&access_token).await?;
    let user = reconcile(state.users.as_ref(), state.avatars.as_ref(), &profile).await?;
    let token = state.keys.sign(user.id)?;
    info!(user_id = %user.id, "github login completed");
    Ok(token)
}
