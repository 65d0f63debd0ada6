//! Test context wiring the PostgreSQL and NATS adapters.

use crate::containers::{NatsContainer, PostgresContainer};
use crate::memory::MemoryAdapters;
use sluice_db::{Database, PgAdvisoryMutex};
use sluice_nats::NatsEventBus;
use sluice_scheduler::Adapters;
use std::sync::Arc;

/// Test context with both services running. Drop it to stop the containers.
pub struct TestContext {
    pub postgres: PostgresContainer,
    pub nats: NatsContainer,
    pub db: Database,
    pub event_bus: NatsEventBus,
    /// Log streams, status checks, and reports stay in memory.
    pub memory: MemoryAdapters,
}

impl TestContext {
    pub async fn new() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let (postgres, nats) = tokio::try_join!(PostgresContainer::start(), NatsContainer::start())?;

        let db = Database::connect(postgres.connection_string()).await?;
        db.migrate().await?;

        let event_bus = NatsEventBus::connect(nats.url()).await?;

        Ok(Self {
            postgres,
            nats,
            db,
            event_bus,
            memory: MemoryAdapters::new(),
        })
    }

    /// Create context with only PostgreSQL.
    pub async fn postgres_only() -> anyhow::Result<PostgresOnlyContext> {
        crate::init_test_logging();

        let postgres = PostgresContainer::start().await?;
        let db = Database::connect(postgres.connection_string()).await?;
        db.migrate().await?;

        Ok(PostgresOnlyContext { postgres, db })
    }

    /// Adapters backed by PostgreSQL and NATS.
    pub fn adapters(&self) -> Adapters {
        Adapters {
            executions: Arc::new(self.db.executions()),
            stages: Arc::new(self.db.stages()),
            steps: Arc::new(self.db.steps()),
            pipelines: Arc::new(self.db.pipelines()),
            events: Arc::new(self.event_bus.clone()),
            logs: self.memory.logs.clone(),
            checks: self.memory.reporter.clone(),
            reporter: self.memory.reporter.clone(),
        }
    }

    pub fn advisory_mutex(&self) -> PgAdvisoryMutex {
        PgAdvisoryMutex::new(self.db.pool().clone(), sluice_db::DatabaseConfig::default().advisory_lock_key)
    }
}

/// Minimal context with only PostgreSQL.
pub struct PostgresOnlyContext {
    pub postgres: PostgresContainer,
    pub db: Database,
}

impl PostgresOnlyContext {
    pub fn db_url(&self) -> &str {
        self.postgres.connection_string()
    }
}
