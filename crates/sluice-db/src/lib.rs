//! PostgreSQL storage layer for Sluice.

pub mod mutex;
pub mod repositories;

pub use mutex::PgAdvisoryMutex;
pub use repositories::*;

use serde::{Deserialize, Serialize};
use sluice_core::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Connection settings for the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Key of the advisory lock serializing queue passes across replicas.
    pub advisory_lock_key: i64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/sluice".to_string(),
            max_connections: 20,
            acquire_timeout_secs: 5,
            advisory_lock_key: 0x736c_7569_6365,
        }
    }
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the database.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(&DatabaseConfig::new(database_url)).await
    }

    pub async fn connect_with(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| sluice_core::Error::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| sluice_core::Error::Database(e.to_string()))?;
        Ok(())
    }

    pub fn executions(&self) -> PgExecutionStore {
        PgExecutionStore::new(self.pool.clone())
    }

    pub fn stages(&self) -> PgStageStore {
        PgStageStore::new(self.pool.clone())
    }

    pub fn steps(&self) -> PgStepStore {
        PgStepStore::new(self.pool.clone())
    }

    pub fn pipelines(&self) -> PgPipelineStore {
        PgPipelineStore::new(self.pool.clone())
    }
}
