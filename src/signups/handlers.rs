use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::auth::jwt::AuthUser;
use crate::error::AppError;
use crate::signups::dto::SignupRequest;
use crate::signups::services;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/opportunities/:id/signups", post(create_signup))
        .route("/opportunities/:id/signups/:start", delete(delete_signup))
}

#[instrument(skip(state))]
pub async fn create_signup(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<SignupRequest>,
) -> Result<StatusCode, AppError> {
    services::sign_up(&state, id, body.start, auth).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn delete_signup(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((id, start)): Path<(Uuid, i64)>,
) -> Result<StatusCode, AppError> {
    services::cancel_signup(&state, id, start, auth).await?;
    Ok(StatusCode::NO_CONTENT)
}
