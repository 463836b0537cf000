use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::auth::dto::{AuthResponse, LoginRequest, RefreshRequest};
use crate::auth::jwt::{AuthUser, JwtKeys};
use crate::error::AppError;
use crate::state::AppState;
use crate::users::dto::UserResponse;
use crate::users::repo::UserStore;
use crate::users::repo_types::User;
use crate::users::services as users;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/refresh", post(refresh))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn token_pair(state: &AppState, user: &User) -> Result<AuthResponse, AppError> {
    let keys = JwtKeys::from_ref(state);
    let access_token = keys.sign_access(user)?;
    let refresh_token = keys.sign_refresh(user)?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: UserResponse::from(user),
    })
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let user = match users::authenticate(&state, &payload.email, &payload.password).await? {
        Some(user) => user,
        None => {
            warn!(email = %payload.email, "login failed");
            return Err(AppError::unauthorized("Invalid credentials"));
        }
    };

    info!(user_id = %user.id, email = %user.email, "user logged in");
    token_pair(&state, &user).map(Json)
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let user = users::register(&state, &payload).await?;
    info!(user_id = %user.id, email = %user.email, "user registered");
    token_pair(&state, &user).map(|body| (StatusCode::CREATED, Json(body)))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh_token)
        .map_err(|_| AppError::unauthorized("Invalid refresh token"))?;

    // Reload so the new pair carries the user's current roles.
    let user = state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| AppError::unauthorized("Current user not found"))?;

    token_pair(&state, &user).map(Json)
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<UserResponse>, AppError> {
    let user = users::get(&state, auth.user_id).await?;
    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::roles::{Role, RoleSet};
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[test]
    fn auth_response_serializes_without_credential_material() {
        let user = User {
            id: Uuid::new_v4(),
            email: "pat@example.com".to_string(),
            name: "Pat".to_string(),
            roles: RoleSet::only(Role::Volunteer),
            password_hash: "phc-string".to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        let response = AuthResponse {
            access_token: "the-access-token".to_string(),
            refresh_token: "the-refresh-token".to_string(),
            user: UserResponse::from(&user),
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("the-access-token"));
        assert!(json.contains("pat@example.com"));
        assert!(!json.contains("phc-string"));
    }
}
