use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::auth::jwt::AuthUser;
use crate::error::AppError;
use crate::opportunities::dto::{OpportunitySummary, SetStatusRequest};
use crate::opportunities::repo_types::Opportunity;
use crate::opportunities::services;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/opportunities",
            get(list_opportunities).post(create_opportunity),
        )
        .route(
            "/opportunities/:id",
            get(get_opportunity)
                .put(update_opportunity)
                .delete(delete_opportunity),
        )
        .route("/opportunities/:id/status", put(set_opportunity_status))
}

#[instrument(skip(state))]
pub async fn list_opportunities(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<OpportunitySummary>>, AppError> {
    let filter = Value::Object(
        params
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect(),
    );
    let privileged = auth.roles.is_champion() || auth.roles.is_admin();
    services::list(&state, &filter, privileged).await.map(Json)
}

#[instrument(skip(state))]
pub async fn get_opportunity(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Opportunity>, AppError> {
    services::get(&state, id).await.map(Json)
}

#[instrument(skip(state, body))]
pub async fn create_opportunity(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Opportunity>), AppError> {
    auth.require_champion()?;
    let opportunity = services::create(&state, &body, auth.user_id).await?;
    Ok((StatusCode::CREATED, Json(opportunity)))
}

#[instrument(skip(state, body))]
pub async fn update_opportunity(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(mut body): Json<Value>,
) -> Result<Json<Opportunity>, AppError> {
    auth.require_champion()?;
    if let Some(obj) = body.as_object_mut() {
        obj.insert("_id".to_string(), Value::String(id.to_string()));
    }
    services::update(&state, &body, auth.user_id).await.map(Json)
}

#[instrument(skip(state))]
pub async fn set_opportunity_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<SetStatusRequest>,
) -> Result<Json<Opportunity>, AppError> {
    auth.require_champion()?;
    services::set_status(&state, id, &body.status, auth.user_id)
        .await
        .map(Json)
}

#[instrument(skip(state))]
pub async fn delete_opportunity(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    auth.require_champion()?;
    services::delete(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
