use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::auth::jwt::AuthUser;
use crate::error::AppError;
use crate::state::AppState;
use crate::users::dto::UserResponse;
use crate::users::services;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<UserResponse>>, AppError> {
    auth.require_admin()?;
    services::list(&state).await.map(Json)
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, AppError> {
    auth.require_admin()?;
    services::get(&state, id).await.map(Json)
}

#[instrument(skip(state, body))]
pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    auth.require_admin()?;
    let user = services::create(&state, &body).await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

#[instrument(skip(state, body))]
pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(mut body): Json<Value>,
) -> Result<Json<UserResponse>, AppError> {
    if !auth.roles.is_admin() && auth.user_id != id {
        return Err(AppError::forbidden("Cannot update another user"));
    }
    // Only admins may change a role set.
    if !auth.roles.is_admin() && body.get("roles").is_some() {
        return Err(AppError::forbidden("Admin role required to change roles"));
    }

    if let Some(obj) = body.as_object_mut() {
        obj.insert("_id".to_string(), Value::String(id.to_string()));
    }
    let user = services::update(&state, &body).await?;
    Ok(Json(UserResponse::from(&user)))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    auth.require_admin()?;
    services::delete(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
