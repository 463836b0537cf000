use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::roles::RoleSet;

/// User record as held by the store. The Argon2 PHC string in
/// `password_hash` embeds the per-user salt; it never leaves the store
/// layer. API responses go through [`crate::users::dto::UserResponse`].
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub roles: RoleSet,
    pub password_hash: String,
    pub created_at: OffsetDateTime,
}
