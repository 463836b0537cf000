use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::auth::password::{hash_password, verify_password};
use crate::error::AppError;
use crate::state::AppState;
use crate::users::dto::UserResponse;
use crate::users::repo::UserStore;
use crate::users::repo_types::User;
use crate::users::roles::{Role, RoleSet};
use crate::validate;

const CREATE_REQUIRED: [&str; 4] = ["email", "name", "roles", "password"];
const CREATE_ALLOWED: [&str; 4] = ["email", "name", "roles", "password"];
const REGISTER_REQUIRED: [&str; 3] = ["email", "name", "password"];
const UPDATE_ALLOWED: [&str; 5] = ["_id", "email", "name", "roles", "password"];
const ROLE_NAMES: [&str; 3] = ["volunteer", "champion", "admin"];
const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn as_object(body: &Value) -> Result<&Map<String, Value>, AppError> {
    body.as_object()
        .ok_or_else(|| AppError::validation("Payload must be a JSON object"))
}

/// Typed checks for whichever of the user fields are present. Check order is
/// fixed: email, name, roles, password.
fn check_fields(obj: &Map<String, Value>) -> Result<(), AppError> {
    validate::check_string(obj, "email", None)?;
    if let Some(email) = obj.get("email").and_then(Value::as_str) {
        if !is_valid_email(email) {
            return Err(AppError::validation(format!("Invalid email address: {email}")));
        }
    }

    validate::check_string(obj, "name", None)?;

    validate::check_array(obj, "roles", Some(&ROLE_NAMES))?;
    if let Some(roles) = obj.get("roles").and_then(Value::as_array) {
        if roles.is_empty() {
            return Err(AppError::validation("At least one role is required"));
        }
    }

    validate::check_string(obj, "password", None)?;
    if let Some(password) = obj.get("password").and_then(Value::as_str) {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
    }

    Ok(())
}

fn parse_id(obj: &Map<String, Value>) -> Result<Uuid, AppError> {
    let raw = obj
        .get("_id")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::validation("The '_id' property must be a string"))?;
    Uuid::parse_str(raw).map_err(|_| AppError::validation(format!("Invalid id: {raw}")))
}

#[derive(Deserialize)]
struct CreateFields {
    email: String,
    name: String,
    roles: Vec<Role>,
    password: String,
}

/// Creates a user with the caller-supplied role set. The plaintext password
/// is hashed and dropped before anything reaches the store.
pub async fn create(state: &AppState, body: &Value) -> Result<User, AppError> {
    let obj = as_object(body)?;
    validate::require_properties(obj, &CREATE_REQUIRED)?;
    validate::restrict_properties(obj, &CREATE_ALLOWED)?;
    check_fields(obj)?;

    let fields: CreateFields = serde_json::from_value(Value::Object(obj.clone()))
        .map_err(|e| AppError::validation(format!("Invalid payload: {e}")))?;

    if state.users.find_by_email(&fields.email).await?.is_some() {
        return Err(AppError::conflict(format!(
            "User already exists: {}",
            fields.email
        )));
    }

    let user = User {
        id: Uuid::new_v4(),
        email: fields.email,
        name: fields.name,
        roles: fields.roles.into_iter().collect(),
        password_hash: hash_password(&fields.password)?,
        created_at: OffsetDateTime::now_utc(),
    };
    state.users.insert(&user).await?;
    info!(user_id = %user.id, email = %user.email, "user created");
    Ok(user)
}

/// Self-registration: only `{email, name, password}` may be supplied and the
/// role set is always `{volunteer}`.
pub async fn register(state: &AppState, body: &Value) -> Result<User, AppError> {
    let obj = as_object(body)?;
    validate::require_properties(obj, &REGISTER_REQUIRED)?;
    validate::restrict_properties(obj, &REGISTER_REQUIRED)?;

    let mut full = obj.clone();
    full.insert("roles".to_string(), json!(["volunteer"]));
    create(state, &Value::Object(full)).await
}

/// Returns the user for the given credentials, or `None` when the email is
/// unknown or the password does not match. Neither case is an error.
pub async fn authenticate(
    state: &AppState,
    email: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    let Some(user) = state.users.find_by_email(email).await? else {
        return Ok(None);
    };

    if verify_password(password, &user.password_hash)? {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

pub async fn get(state: &AppState, id: Uuid) -> Result<UserResponse, AppError> {
    state
        .users
        .find_by_id(id)
        .await?
        .map(UserResponse::from)
        .ok_or_else(|| AppError::not_found(format!("No user with id {id}")))
}

pub async fn find_by_email(state: &AppState, email: &str) -> Result<Option<UserResponse>, AppError> {
    Ok(state
        .users
        .find_by_email(email)
        .await?
        .map(UserResponse::from))
}

pub async fn list(state: &AppState) -> Result<Vec<UserResponse>, AppError> {
    let users = state.users.list().await?;
    Ok(users.iter().map(UserResponse::from).collect())
}

/// Partial update. Only the supplied fields are checked and written; a
/// changed email is re-checked for uniqueness and a supplied password is
/// re-hashed, never stored in the clear.
pub async fn update(state: &AppState, body: &Value) -> Result<User, AppError> {
    let obj = as_object(body)?;
    validate::require_properties(obj, &["_id"])?;
    validate::restrict_properties(obj, &UPDATE_ALLOWED)?;
    validate::check_string(obj, "_id", None)?;
    check_fields(obj)?;

    let id = parse_id(obj)?;
    let mut user = state
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No user with id {id}")))?;

    if let Some(email) = obj.get("email").and_then(Value::as_str) {
        if email != user.email {
            if state.users.find_by_email(email).await?.is_some() {
                return Err(AppError::conflict(format!("User already exists: {email}")));
            }
            user.email = email.to_string();
        }
    }

    if let Some(name) = obj.get("name").and_then(Value::as_str) {
        user.name = name.to_string();
    }

    if let Some(roles) = obj.get("roles").filter(|v| !v.is_null()) {
        let roles: Vec<Role> = serde_json::from_value(roles.clone())
            .map_err(|e| AppError::validation(format!("Invalid roles: {e}")))?;
        user.roles = roles.into_iter().collect::<RoleSet>();
    }

    if let Some(password) = obj.get("password").and_then(Value::as_str) {
        user.password_hash = hash_password(password)?;
    }

    state.users.update(&user).await?;
    info!(user_id = %user.id, "user updated");
    Ok(user)
}

pub async fn delete(state: &AppState, id: Uuid) -> Result<(), AppError> {
    state.users.delete(id).await?;
    info!(user_id = %id, "user deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState::fake()
    }

    fn valid_body() -> Value {
        json!({
            "email": "pat@example.com",
            "name": "Pat",
            "roles": ["volunteer", "champion"],
            "password": "long-enough-password"
        })
    }

    #[tokio::test]
    async fn create_hashes_the_password_and_strips_the_plaintext() {
        let state = state();
        let user = create(&state, &valid_body()).await.expect("create");
        assert_ne!(user.password_hash, "long-enough-password");
        assert!(user.roles.is_champion());

        let authed = authenticate(&state, "pat@example.com", "long-enough-password")
            .await
            .expect("authenticate");
        assert!(authed.is_some());
    }

    #[tokio::test]
    async fn create_rejects_an_empty_role_list() {
        let state = state();
        let mut body = valid_body();
        body["roles"] = json!([]);
        let err = create(&state, &body).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("At least one role"));
    }

    #[tokio::test]
    async fn create_rejects_unknown_roles_and_extra_properties() {
        let state = state();
        let mut body = valid_body();
        body["roles"] = json!(["superuser"]);
        assert!(matches!(
            create(&state, &body).await.unwrap_err(),
            AppError::Validation(_)
        ));

        let mut body = valid_body();
        body["admin"] = json!(true);
        assert!(matches!(
            create(&state, &body).await.unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn create_enforces_email_uniqueness() {
        let state = state();
        create(&state, &valid_body()).await.expect("first create");
        let err = create(&state, &valid_body()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn validation_is_fail_fast_in_field_order() {
        let state = state();
        // Both email and roles are invalid; the email check runs first.
        let body = json!({
            "email": "not-an-email",
            "name": "Pat",
            "roles": [],
            "password": "long-enough-password"
        });
        let err = create(&state, &body).await.unwrap_err();
        assert!(err.to_string().contains("email"));
    }

    #[tokio::test]
    async fn register_forces_the_volunteer_role() {
        let state = state();
        let body = json!({
            "email": "new@example.com",
            "name": "New",
            "password": "long-enough-password"
        });
        let user = register(&state, &body).await.expect("register");
        assert!(user.roles.is_volunteer());
        assert!(!user.roles.is_champion());
        assert!(!user.roles.is_admin());
    }

    #[tokio::test]
    async fn register_rejects_a_caller_supplied_role_list() {
        let state = state();
        let body = json!({
            "email": "new@example.com",
            "name": "New",
            "roles": ["admin"],
            "password": "long-enough-password"
        });
        let err = register(&state, &body).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn lookups_return_sanitized_records() {
        let state = state();
        let user = create(&state, &valid_body()).await.expect("create");

        let found = find_by_email(&state, "pat@example.com")
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(found.id, user.id);
        assert!(find_by_email(&state, "nobody@example.com")
            .await
            .expect("lookup")
            .is_none());

        // The sanitized view serializes without any credential material.
        let json = serde_json::to_value(&found).expect("serialize");
        assert!(json.get("password_hash").is_none());
        assert!(json.get("salt").is_none());

        let all = list(&state).await.expect("list");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn authenticate_returns_none_for_wrong_password_or_unknown_email() {
        let state = state();
        create(&state, &valid_body()).await.expect("create");

        let wrong = authenticate(&state, "pat@example.com", "wrongpassword")
            .await
            .expect("no error");
        assert!(wrong.is_none());

        let unknown = authenticate(&state, "unknown@example.com", "whatever")
            .await
            .expect("no error");
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn update_rechecks_email_uniqueness_against_other_records() {
        let state = state();
        let first = create(&state, &valid_body()).await.expect("create");
        let mut other = valid_body();
        other["email"] = json!("other@example.com");
        create(&state, &other).await.expect("create other");

        let body = json!({ "_id": first.id.to_string(), "email": "other@example.com" });
        let err = update(&state, &body).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // Re-submitting the user's own email is fine.
        let body = json!({ "_id": first.id.to_string(), "email": "pat@example.com" });
        update(&state, &body).await.expect("same email ok");
    }

    #[tokio::test]
    async fn update_rehashes_a_new_password() {
        let state = state();
        let user = create(&state, &valid_body()).await.expect("create");

        let body = json!({ "_id": user.id.to_string(), "password": "a-brand-new-secret" });
        update(&state, &body).await.expect("update");

        assert!(authenticate(&state, "pat@example.com", "a-brand-new-secret")
            .await
            .expect("authenticate")
            .is_some());
        assert!(authenticate(&state, "pat@example.com", "long-enough-password")
            .await
            .expect("authenticate")
            .is_none());
    }

    #[tokio::test]
    async fn update_requires_a_resolvable_id() {
        let state = state();
        let body = json!({ "_id": Uuid::new_v4().to_string(), "name": "Ghost" });
        assert!(matches!(
            update(&state, &body).await.unwrap_err(),
            AppError::NotFound(_)
        ));

        let body = json!({ "name": "No id" });
        assert!(matches!(
            update(&state, &body).await.unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn delete_is_unconditional_but_requires_a_known_id() {
        let state = state();
        let user = create(&state, &valid_body()).await.expect("create");
        delete(&state, user.id).await.expect("delete");
        assert!(matches!(
            delete(&state, user.id).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }
}
