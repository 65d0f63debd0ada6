//! PostgreSQL implementation of ExecutionStore.

use super::stage::insert_stage;
use super::{check_version, db_err};
use async_trait::async_trait;
use chrono::Utc;
use sluice_core::ports::ExecutionStore;
use sluice_core::{Execution, ExecutionId, PipelineId, RepoId, Result, Stage, Status};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

const EXECUTION_COLUMNS: &str = "id, repo_id, pipeline_id, number, status, error, trigger, event, action, cron, git_ref, source, target, before_sha, after_sha, title, message, author_login, author_name, author_email, sender, params, debug, parent, started, finished, created, updated, version";

/// PostgreSQL implementation of ExecutionStore.
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    /// Create a new PgExecutionStore.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_execution(&self, r: &PgRow) -> Result<Execution> {
        let status: String = r.get("status");

        Ok(Execution {
            id: ExecutionId::new(r.get("id")),
            repo_id: RepoId::new(r.get("repo_id")),
            pipeline_id: PipelineId::new(r.get("pipeline_id")),
            number: r.get("number"),
            status: status.parse::<Status>()?,
            error: r.get("error"),
            trigger: r.get("trigger"),
            event: r.get("event"),
            action: r.get("action"),
            cron: r.get("cron"),
            git_ref: r.get("git_ref"),
            source: r.get("source"),
            target: r.get("target"),
            before: r.get("before_sha"),
            after: r.get("after_sha"),
            title: r.get("title"),
            message: r.get("message"),
            author_login: r.get("author_login"),
            author_name: r.get("author_name"),
            author_email: r.get("author_email"),
            sender: r.get("sender"),
            params: serde_json::from_value(r.get("params"))?,
            debug: r.get("debug"),
            parent: r.get::<Option<i64>, _>("parent").map(ExecutionId::new),
            started: r.get("started"),
            finished: r.get("finished"),
            created: r.get("created"),
            updated: r.get("updated"),
            version: r.get("version"),
            stages: Vec::new(),
        })
    }
}

async fn insert_execution(conn: &mut PgConnection, execution: &mut Execution) -> Result<()> {
    let now = Utc::now();
    execution.created = now;
    execution.updated = now;

    let row = sqlx::query(
        r#"INSERT INTO executions (repo_id, pipeline_id, number, status, error, trigger, event, action, cron, git_ref, source, target, before_sha, after_sha, title, message, author_login, author_name, author_email, sender, params, debug, parent, started, finished, created, updated, version)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, 1)
           RETURNING id"#,
    )
    .bind(execution.repo_id.get())
    .bind(execution.pipeline_id.get())
    .bind(execution.number)
    .bind(execution.status.as_str())
    .bind(&execution.error)
    .bind(&execution.trigger)
    .bind(&execution.event)
    .bind(&execution.action)
    .bind(&execution.cron)
    .bind(&execution.git_ref)
    .bind(&execution.source)
    .bind(&execution.target)
    .bind(&execution.before)
    .bind(&execution.after)
    .bind(&execution.title)
    .bind(&execution.message)
    .bind(&execution.author_login)
    .bind(&execution.author_name)
    .bind(&execution.author_email)
    .bind(&execution.sender)
    .bind(serde_json::to_value(&execution.params)?)
    .bind(execution.debug)
    .bind(execution.parent.map(|p| p.get()))
    .bind(execution.started)
    .bind(execution.finished)
    .bind(execution.created)
    .bind(execution.updated)
    .fetch_one(conn)
    .await
    .map_err(db_err)?;

    execution.id = ExecutionId::new(row.get("id"));
    execution.version = 1;
    Ok(())
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn find(&self, id: ExecutionId) -> Result<Option<Execution>> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(r) => Ok(Some(self.row_to_execution(&r)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, execution: &mut Execution) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        insert_execution(&mut *conn, execution).await
    }

    async fn create_with_stages(&self, execution: &mut Execution, stages: &mut [Stage]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        insert_execution(&mut *tx, execution).await?;
        for stage in stages.iter_mut() {
            stage.execution_id = execution.id;
            stage.repo_id = execution.repo_id;
            stage.created = execution.created;
            stage.updated = execution.created;
            insert_stage(&mut *tx, stage).await?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn update(&self, execution: &mut Execution) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"UPDATE executions SET status = $3, error = $4, started = $5, finished = $6,
                   updated = $7, version = version + 1
               WHERE id = $1 AND version = $2"#,
        )
        .bind(execution.id.get())
        .bind(execution.version)
        .bind(execution.status.as_str())
        .bind(&execution.error)
        .bind(execution.started)
        .bind(execution.finished)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        check_version(result.rows_affected())?;
        execution.version += 1;
        execution.updated = now;
        Ok(())
    }
}
