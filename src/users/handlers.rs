use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::header::CONTENT_TYPE,
    routing::{get, put},
    Json, Router,
};
use tracing::instrument;

use super::{
    avatar::{AvatarUpload, MAX_AVATAR_BYTES},
    dto::{MessageResponse, UpdateProfileRequest},
    model::PublicUser,
    services::{self, ProfileUpdate},
};
use crate::{auth::extractors::CurrentUser, error::AppError, state::AppState};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/users/profile",
            get(get_profile).put(update_profile).delete(delete_profile),
        )
        .route("/users/avatar", put(replace_avatar))
        // base64 inflates the payload by a third
        .layer(DefaultBodyLimit::max(MAX_AVATAR_BYTES * 3 / 2))
}

fn bad_body(message: impl ToString) -> AppError {
    AppError::invalid("body", message.to_string())
}

/// Reads `username`, `email`, `password` text fields and an `avatar` field.
/// An `avatar` part with a file name is an upload; without one it is a data URL.
async fn read_multipart(mut mp: Multipart) -> Result<ProfileUpdate, AppError> {
    let mut update = ProfileUpdate::default();
    while let Some(field) = mp.next_field().await.map_err(bad_body)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "avatar" => {
                let avatar = if field.file_name().is_some() {
                    let body = field.bytes().await.map_err(bad_body)?;
                    (!body.is_empty()).then_some(AvatarUpload::File(body))
                } else {
                    let text = field.text().await.map_err(bad_body)?;
                    (!text.trim().is_empty()).then_some(AvatarUpload::DataUrl(text))
                };
                if let Some(avatar) = avatar {
                    if update.avatar.is_some() {
                        return Err(AppError::invalid(
                            "avatar",
                            "send either a file or a data URL, not both",
                        ));
                    }
                    update.avatar = Some(avatar);
                }
            }
            "username" => update.username = Some(field.text().await.map_err(bad_body)?),
            "email" => update.email = Some(field.text().await.map_err(bad_body)?),
            "password" => update.password = Some(field.text().await.map_err(bad_body)?),
            _ => {}
        }
    }
    Ok(update)
}

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"))
}

#[instrument(skip_all)]
pub async fn get_profile(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(user.into())
}

/// PUT /users/profile, JSON or multipart.
#[instrument(skip_all)]
pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    req: Request,
) -> Result<Json<PublicUser>, AppError> {
    let update = if is_multipart(&req) {
        let mp = Multipart::from_request(req, &state)
            .await
            .map_err(|e| bad_body(e.body_text()))?;
        read_multipart(mp).await?
    } else {
        let Json(body) = Json::<UpdateProfileRequest>::from_request(req, &state)
            .await
            .map_err(|e| bad_body(e.body_text()))?;
        ProfileUpdate {
            username: body.username,
            email: body.email,
            password: body.password,
            avatar: body
                .avatar
                .filter(|a| !a.trim().is_empty())
                .map(AvatarUpload::DataUrl),
        }
    };
    services::update_profile(&state, user, update).await.map(Json)
}

/// PUT /users/avatar, multipart with an `avatar` part.
#[instrument(skip_all)]
pub async fn replace_avatar(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mp: Multipart,
) -> Result<Json<PublicUser>, AppError> {
    let update = read_multipart(mp).await?;
    let Some(avatar) = update.avatar else {
        return Err(AppError::invalid("avatar", "an image is required"));
    };
    let update = ProfileUpdate {
        avatar: Some(avatar),
        ..Default::default()
    };
    services::update_profile(&state, user, update).await.map(Json)
}

#[instrument(skip_all)]
pub async fn delete_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<MessageResponse>, AppError> {
    services::delete_account(&state, user).await?;
    Ok(Json(MessageResponse {
        message: "User deleted successfully".into(),
    }))
}
