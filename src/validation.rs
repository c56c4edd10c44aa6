use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

lazy_static! {
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap();
    static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
}

pub const USERNAME_MIN: usize = 2;
pub const USERNAME_MAX: usize = 30;
const PASSWORD_MIN: usize = 8;
const PASSWORD_MAX: usize = 100;
const PASSWORD_SPECIALS: &str = "@$!%*?&";

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn check_username(username: &str) -> Option<FieldError> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Some(FieldError::new(
            "username",
            format!("must be between {USERNAME_MIN} and {USERNAME_MAX} characters"),
        ));
    }
    if !USERNAME_RE.is_match(username) {
        return Some(FieldError::new(
            "username",
            "may only contain letters, numbers, underscores and hyphens",
        ));
    }
    None
}

pub fn check_email(email: &str) -> Option<FieldError> {
    (!is_valid_email(email)).then(|| FieldError::new("email", "must be a valid email address"))
}

pub fn check_password(password: &str) -> Option<FieldError> {
    let len = password.chars().count();
    let message = if !(PASSWORD_MIN..=PASSWORD_MAX).contains(&len) {
        format!("must be between {PASSWORD_MIN} and {PASSWORD_MAX} characters")
    } else if !password.chars().any(|c| c.is_ascii_lowercase()) {
        "must contain at least one lowercase letter".into()
    } else if !password.chars().any(|c| c.is_ascii_uppercase()) {
        "must contain at least one uppercase letter".into()
    } else if !password.chars().any(|c| c.is_ascii_digit()) {
        "must contain at least one number".into()
    } else if !password.chars().any(|c| PASSWORD_SPECIALS.contains(c)) {
        format!("must contain at least one special character ({PASSWORD_SPECIALS})")
    } else {
        return None;
    };
    Some(FieldError::new("password", message))
}

/// Collects every failing check into one error.
pub fn collect(checks: impl IntoIterator<Item = Option<FieldError>>) -> Result<(), AppError> {
    let errors: Vec<FieldError> = checks.into_iter().flatten().collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}
