use tracing::{info, instrument, warn};

use super::{
    avatar::{self, AvatarUpload},
    model::{PublicUser, User, UserChanges},
    repo::UserStore,
};
use crate::{
    auth::password::hash_password_blocking,
    error::{AppError, AuthError},
    state::AppState,
    storage::{discard_avatar, AvatarStorage},
    validation::{self, normalize_email},
};

/// Requested profile edits. Blank strings mean "leave as is".
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub avatar: Option<AvatarUpload>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_profile(
    state: &AppState,
    user: User,
    update: ProfileUpdate,
) -> Result<PublicUser, AppError> {
    let username = non_blank(update.username);
    let email = non_blank(update.email).map(|e| normalize_email(&e));
    let password = update.password.filter(|p| !p.is_empty());
    validation::collect([
        username.as_deref().and_then(validation::check_username),
        email.as_deref().and_then(validation::check_email),
        password.as_deref().and_then(validation::check_password),
    ])?;
    let image = update.avatar.map(avatar::prepare).transpose()?;

    let password = match password {
        Some(raw) => Some(hash_password_blocking(raw).await?),
        None => None,
    };
    let new_avatar = match image {
        Some(image) => Some(
            state
                .avatars
                .put(&avatar::file_name(user.id, image.ext), image.body)
                .await?,
        ),
        None => None,
    };

    let changes = UserChanges {
        username,
        email,
        password,
        avatar: new_avatar.clone(),
    };
    if changes.is_empty() {
        return Ok(user.into());
    }

    let updated = match state.users.update(user.id, changes).await {
        Ok(Some(updated)) => updated,
        outcome => {
            // The new file never made it onto a record.
            if let Some(reference) = new_avatar.as_deref() {
                discard_avatar(state.avatars.as_ref(), reference).await;
            }
            return Err(match outcome {
                Err(e) => e.into(),
                _ => AuthError::UnknownSubject.into(),
            });
        }
    };

    if new_avatar.is_some() {
        if let Some(old) = user.avatar.as_deref() {
            discard_avatar(state.avatars.as_ref(), old).await;
        }
    }
    info!(user_id = %updated.id, "profile updated");
    Ok(updated.into())
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn delete_account(state: &AppState, user: User) -> Result<(), AppError> {
    if !state.users.delete(user.id).await? {
        warn!("user already gone");
        return Err(AuthError::UnknownSubject.into());
    }
    if let Some(reference) = user.avatar.as_deref() {
        discard_avatar(state.avatars.as_ref(), reference).await;
    }
    info!(user_id = %user.id, "user deleted");
    Ok(())
}
