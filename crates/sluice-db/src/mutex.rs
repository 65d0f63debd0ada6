//! Cross-process queue mutex backed by a PostgreSQL advisory lock.

use crate::repositories::db_err;
use async_trait::async_trait;
use sluice_core::ports::DistributedMutex;
use sluice_core::{Error, Result};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgPool, Postgres};
use tokio::sync::Mutex;
use tracing::warn;

/// Session-level advisory locks belong to the connection that took them, so
/// the connection is held between `lock` and `unlock`.
pub struct PgAdvisoryMutex {
    pool: PgPool,
    key: i64,
    held: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgAdvisoryMutex {
    pub fn new(pool: PgPool, key: i64) -> Self {
        Self {
            pool,
            key,
            held: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DistributedMutex for PgAdvisoryMutex {
    async fn lock(&self) -> Result<()> {
        let mut held = self.held.lock().await;
        if held.is_some() {
            return Err(Error::Internal("advisory lock already held".to_string()));
        }

        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(self.key)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;

        *held = Some(conn);
        Ok(())
    }

    async fn unlock(&self) -> Result<()> {
        let mut held = self.held.lock().await;
        let Some(mut conn) = held.take() else {
            return Ok(());
        };

        let result = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .execute(&mut *conn)
            .await;

        if let Err(e) = result {
            // The session may still own the lock; ending it is the only way
            // to release it, so the connection never goes back to the pool.
            if let Err(close_err) = conn.detach().close().await {
                warn!(error = %close_err, "advisory mutex: cannot close lock session");
            }
            return Err(db_err(e));
        }
        Ok(())
    }
}
