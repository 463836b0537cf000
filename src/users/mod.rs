use axum::Router;

use crate::state::AppState;

pub mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod roles;
pub mod services;

pub fn router() -> Router<AppState> {
    handlers::router()
}
