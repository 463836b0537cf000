use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;
use crate::opportunities::repo_types::{Location, Opportunity, Slot, Stamp, Status};

/// How many times a service reloads and re-applies after losing a revision
/// race before giving up with a conflict.
pub const MAX_WRITE_ATTEMPTS: usize = 5;

/// Store-level list filter, already validated and resolved by the service
/// layer (`title_contains` is a literal substring, never a pattern).
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub title_contains: Option<String>,
    pub office: Option<String>,
    pub status: Option<Status>,
}

/// Document-store contract for opportunities.
///
/// Writes are conditional: `update` and `delete` only apply while the stored
/// revision still equals the one the caller read, so a lost race surfaces as
/// `false` instead of silently clobbering a concurrent writer. The store
/// bumps the revision on every applied update.
#[async_trait]
pub trait OpportunityStore: Send + Sync {
    async fn insert(&self, opportunity: &Opportunity) -> Result<(), AppError>;
    async fn find(&self, query: &ListQuery) -> Result<Vec<Opportunity>, AppError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Opportunity>, AppError>;
    async fn update(
        &self,
        opportunity: &Opportunity,
        expected_revision: i64,
    ) -> Result<bool, AppError>;
    async fn delete(&self, id: Uuid, expected_revision: i64) -> Result<bool, AppError>;
}

#[derive(Debug, FromRow)]
struct OpportunityRow {
    id: Uuid,
    title: String,
    description: String,
    office: String,
    location: Json<Location>,
    deadline: i64,
    waiver: Option<String>,
    status: String,
    slots: Json<Vec<Slot>>,
    created_by: Uuid,
    created_at: OffsetDateTime,
    modified_by: Uuid,
    modified_at: OffsetDateTime,
    revision: i64,
}

impl TryFrom<OpportunityRow> for Opportunity {
    type Error = AppError;

    fn try_from(row: OpportunityRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<Status>()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("unknown status stored for opportunity {}: {}", row.id, row.status)))?;
        Ok(Opportunity {
            id: row.id,
            title: row.title,
            description: row.description,
            office: row.office,
            location: row.location.0,
            deadline: row.deadline,
            waiver: row.waiver,
            status,
            slots: row.slots.0,
            created: Stamp {
                user: row.created_by,
                time: row.created_at,
            },
            last_modified: Stamp {
                user: row.modified_by,
                time: row.modified_at,
            },
            revision: row.revision,
        })
    }
}

const OPPORTUNITY_COLUMNS: &str = "id, title, description, office, location, deadline, waiver, \
     status, slots, created_by, created_at, modified_by, modified_at, revision";

/// Escapes LIKE metacharacters so a filter string always matches literally.
fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub struct PgOpportunityStore {
    pool: PgPool,
}

impl PgOpportunityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OpportunityStore for PgOpportunityStore {
    async fn insert(&self, opportunity: &Opportunity) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO opportunities \
             (id, title, description, office, location, deadline, waiver, status, slots, \
              created_by, created_at, modified_by, modified_at, revision) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(opportunity.id)
        .bind(&opportunity.title)
        .bind(&opportunity.description)
        .bind(&opportunity.office)
        .bind(Json(&opportunity.location))
        .bind(opportunity.deadline)
        .bind(&opportunity.waiver)
        .bind(opportunity.status.as_str())
        .bind(Json(&opportunity.slots))
        .bind(opportunity.created.user)
        .bind(opportunity.created.time)
        .bind(opportunity.last_modified.user)
        .bind(opportunity.last_modified.time)
        .bind(opportunity.revision)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, query: &ListQuery) -> Result<Vec<Opportunity>, AppError> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunities WHERE TRUE"
        ));

        if let Some(title) = &query.title_contains {
            builder
                .push(" AND title ILIKE ")
                .push_bind(format!("%{}%", escape_like(title)));
        }
        if let Some(office) = &query.office {
            builder.push(" AND office = ").push_bind(office.clone());
        }
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY created_at DESC");

        let rows: Vec<OpportunityRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Opportunity::try_from).collect()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Opportunity>, AppError> {
        let row = sqlx::query_as::<_, OpportunityRow>(&format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunities WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Opportunity::try_from).transpose()
    }

    async fn update(
        &self,
        opportunity: &Opportunity,
        expected_revision: i64,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE opportunities SET \
             title = $2, description = $3, office = $4, location = $5, deadline = $6, \
             waiver = $7, status = $8, slots = $9, modified_by = $10, modified_at = $11, \
             revision = revision + 1 \
             WHERE id = $1 AND revision = $12",
        )
        .bind(opportunity.id)
        .bind(&opportunity.title)
        .bind(&opportunity.description)
        .bind(&opportunity.office)
        .bind(Json(&opportunity.location))
        .bind(opportunity.deadline)
        .bind(&opportunity.waiver)
        .bind(opportunity.status.as_str())
        .bind(Json(&opportunity.slots))
        .bind(opportunity.last_modified.user)
        .bind(opportunity.last_modified.time)
        .bind(expected_revision)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: Uuid, expected_revision: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM opportunities WHERE id = $1 AND revision = $2")
            .bind(id)
            .bind(expected_revision)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

/// In-memory store used by [`crate::state::AppState::fake`] and the test
/// suite. The map lock makes the revision compare-and-swap atomic.
#[derive(Default)]
pub struct MemoryOpportunityStore {
    opportunities: Mutex<HashMap<Uuid, Opportunity>>,
}

#[async_trait]
impl OpportunityStore for MemoryOpportunityStore {
    async fn insert(&self, opportunity: &Opportunity) -> Result<(), AppError> {
        self.opportunities
            .lock()
            .await
            .insert(opportunity.id, opportunity.clone());
        Ok(())
    }

    async fn find(&self, query: &ListQuery) -> Result<Vec<Opportunity>, AppError> {
        let opportunities = self.opportunities.lock().await;
        let mut matches: Vec<Opportunity> = opportunities
            .values()
            .filter(|opp| {
                query.title_contains.as_ref().is_none_or(|needle| {
                    opp.title.to_lowercase().contains(&needle.to_lowercase())
                })
            })
            .filter(|opp| query.office.as_ref().is_none_or(|office| &opp.office == office))
            .filter(|opp| query.status.is_none_or(|status| opp.status == status))
            .cloned()
            .collect();
        matches.sort_by_key(|opp| opp.created.time);
        matches.reverse();
        Ok(matches)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Opportunity>, AppError> {
        Ok(self.opportunities.lock().await.get(&id).cloned())
    }

    async fn update(
        &self,
        opportunity: &Opportunity,
        expected_revision: i64,
    ) -> Result<bool, AppError> {
        let mut opportunities = self.opportunities.lock().await;
        match opportunities.get_mut(&opportunity.id) {
            Some(stored) if stored.revision == expected_revision => {
                *stored = opportunity.clone();
                stored.revision = expected_revision + 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid, expected_revision: i64) -> Result<bool, AppError> {
        let mut opportunities = self.opportunities.lock().await;
        match opportunities.get(&id) {
            Some(stored) if stored.revision == expected_revision => {
                opportunities.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
