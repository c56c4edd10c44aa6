use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;

/// File size limit: 5MB
pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

/// An avatar as it arrives: exactly one of these per request.
#[derive(Debug, Clone)]
pub enum AvatarUpload {
    File(Bytes),
    /// `data:image/png;base64,...`
    DataUrl(String),
}

#[derive(Debug)]
pub struct AvatarImage {
    pub body: Bytes,
    pub ext: &'static str,
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

fn invalid(message: &str) -> AppError {
    AppError::invalid("avatar", message)
}

fn decode_data_url(data_url: &str) -> Result<Bytes, AppError> {
    let rest = data_url
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| invalid("must be an uploaded file or an image data URL"))?;
    let (mime, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| invalid("data URL must be base64 encoded"))?;
    if !mime.starts_with("image/") {
        return Err(invalid("data URL must carry an image"));
    }
    let raw = STANDARD
        .decode(payload.trim())
        .map_err(|_| invalid("data URL is not valid base64"))?;
    Ok(Bytes::from(raw))
}

/// Decodes and checks the payload. The stored type comes from the bytes,
/// not from what the client claimed.
pub fn prepare(upload: AvatarUpload) -> Result<AvatarImage, AppError> {
    let body = match upload {
        AvatarUpload::File(body) => body,
        AvatarUpload::DataUrl(url) => decode_data_url(&url)?,
    };
    if body.is_empty() {
        return Err(invalid("image is empty"));
    }
    if body.len() > MAX_AVATAR_BYTES {
        return Err(invalid("image exceeds the 5MB limit"));
    }
    let ext = infer::get(&body)
        .and_then(|kind| ext_from_mime(kind.mime_type()))
        .ok_or_else(|| invalid("only JPEG, PNG, GIF and WebP images are supported"))?;
    Ok(AvatarImage { body, ext })
}

pub fn file_name(user_id: Uuid, ext: &str) -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    format!("avatar-{user_id}-{millis}.{ext}")
}
