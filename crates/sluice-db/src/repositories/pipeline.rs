//! PostgreSQL implementation of PipelineStore.

use super::{check_version, db_err};
use async_trait::async_trait;
use chrono::Utc;
use sluice_core::ports::PipelineStore;
use sluice_core::pipeline::Pipeline;
use sluice_core::{Error, PipelineId, RepoId, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

/// Attempts at bumping the sequence number before giving up.
const SEQ_RETRIES: usize = 10;

/// PostgreSQL implementation of PipelineStore.
#[derive(Clone)]
pub struct PgPipelineStore {
    pool: PgPool,
}

impl PgPipelineStore {
    /// Create a new PgPipelineStore.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a pipeline. Used by the surrounding system and tests.
    pub async fn create(&self, pipeline: &mut Pipeline) -> Result<()> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"INSERT INTO pipelines (repo_id, uid, config_path, seq, created, updated, version)
               VALUES ($1, $2, $3, $4, $5, $5, 1)
               RETURNING id"#,
        )
        .bind(pipeline.repo_id.get())
        .bind(&pipeline.uid)
        .bind(&pipeline.config_path)
        .bind(pipeline.seq)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        pipeline.id = PipelineId::new(row.get("id"));
        pipeline.created = now;
        pipeline.updated = now;
        pipeline.version = 1;
        Ok(())
    }

    fn row_to_pipeline(r: &PgRow) -> Pipeline {
        Pipeline {
            id: PipelineId::new(r.get("id")),
            repo_id: RepoId::new(r.get("repo_id")),
            uid: r.get("uid"),
            config_path: r.get("config_path"),
            seq: r.get("seq"),
            created: r.get("created"),
            updated: r.get("updated"),
            version: r.get("version"),
        }
    }
}

#[async_trait]
impl PipelineStore for PgPipelineStore {
    async fn find(&self, id: PipelineId) -> Result<Option<Pipeline>> {
        let row = sqlx::query(
            "SELECT id, repo_id, uid, config_path, seq, created, updated, version FROM pipelines WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.as_ref().map(Self::row_to_pipeline))
    }

    async fn increment_seq_num(&self, pipeline: &Pipeline) -> Result<Pipeline> {
        let mut current = pipeline.clone();

        for attempt in 0..SEQ_RETRIES {
            let now = Utc::now();
            let result = sqlx::query(
                r#"UPDATE pipelines SET seq = seq + 1, updated = $3, version = version + 1
                   WHERE id = $1 AND version = $2"#,
            )
            .bind(current.id.get())
            .bind(current.version)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

            match check_version(result.rows_affected()) {
                Ok(()) => {
                    current.seq += 1;
                    current.version += 1;
                    current.updated = now;
                    return Ok(current);
                }
                Err(Error::VersionConflict) => {
                    debug!(pipeline_id = %current.id, attempt, "Sequence bump conflicted, reloading");
                    current = self
                        .find(current.id)
                        .await?
                        .ok_or_else(|| Error::PipelineNotFound(pipeline.id.to_string()))?;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::VersionConflict)
    }
}
