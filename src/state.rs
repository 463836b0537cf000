use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::config::AppConfig;
use crate::opportunities::repo::{MemoryOpportunityStore, OpportunityStore, PgOpportunityStore};
use crate::users::repo::{MemoryUserStore, PgUserStore, UserStore};

/// Everything the use-case layer depends on, passed explicitly through axum
/// state rather than via ambient globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub opportunities: Arc<dyn OpportunityStore>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;

        Ok(Self {
            config,
            users: Arc::new(PgUserStore::new(db.clone())),
            opportunities: Arc::new(PgOpportunityStore::new(db)),
        })
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        opportunities: Arc<dyn OpportunityStore>,
    ) -> Self {
        Self {
            config,
            users,
            opportunities,
        }
    }

    /// In-memory state for the test suite: no database, no network.
    pub fn fake() -> Self {
        let config = Arc::new(AppConfig {
            database_url: "postgres://localhost/unused".into(),
            jwt: crate::config::JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
        });

        Self::from_parts(
            config,
            Arc::new(MemoryUserStore::default()),
            Arc::new(MemoryOpportunityStore::default()),
        )
    }
}
