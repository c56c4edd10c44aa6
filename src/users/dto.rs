use serde::{Deserialize, Serialize};

/// JSON body for `PUT /users/profile`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    /// Inline image as a data URL.
    pub avatar: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
