use crate::state::AppState;
use axum::Router;

mod claims;
pub mod dto;
pub(crate) mod extractors;
pub mod github;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod reconcile;
pub mod services;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
