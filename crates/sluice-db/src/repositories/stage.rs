//! PostgreSQL implementation of StageStore.

use super::{check_version, db_err};
use async_trait::async_trait;
use chrono::Utc;
use sluice_core::ports::StageStore;
use sluice_core::{Error, ExecutionId, RepoId, Result, Stage, StageId, Status};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use std::collections::BTreeMap;

const STAGE_COLUMNS: &str = "id, execution_id, repo_id, number, name, kind, stage_type, status, error, err_ignore, exit_code, machine, os, arch, variant, kernel, stage_limit, limit_repo, on_success, on_failure, depends_on, labels, started, stopped, created, updated, version";

/// PostgreSQL implementation of StageStore.
pub struct PgStageStore {
    pool: PgPool,
}

impl PgStageStore {
    /// Create a new PgStageStore.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn query_stages(&self, sql: &str, execution_id: Option<ExecutionId>) -> Result<Vec<Stage>> {
        let mut query = sqlx::query(sql);
        if let Some(id) = execution_id {
            query = query.bind(id.get());
        }
        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(row_to_stage).collect()
    }
}

pub(crate) fn row_to_stage(r: &PgRow) -> Result<Stage> {
    let status: String = r.get("status");
    let depends_on: Vec<String> = serde_json::from_value(r.get("depends_on"))?;
    let labels: BTreeMap<String, String> = serde_json::from_value(r.get("labels"))?;

    Ok(Stage {
        id: StageId::new(r.get("id")),
        execution_id: ExecutionId::new(r.get("execution_id")),
        repo_id: RepoId::new(r.get("repo_id")),
        number: r.get("number"),
        name: r.get("name"),
        kind: r.get("kind"),
        stage_type: r.get("stage_type"),
        status: status.parse::<Status>()?,
        error: r.get("error"),
        err_ignore: r.get("err_ignore"),
        exit_code: r.get("exit_code"),
        machine: r.get("machine"),
        os: r.get("os"),
        arch: r.get("arch"),
        variant: r.get("variant"),
        kernel: r.get("kernel"),
        limit: limit_from_column("stage_limit", r.get("stage_limit"))?,
        limit_repo: limit_from_column("limit_repo", r.get("limit_repo"))?,
        on_success: r.get("on_success"),
        on_failure: r.get("on_failure"),
        depends_on,
        labels,
        started: r.get("started"),
        stopped: r.get("stopped"),
        created: r.get("created"),
        updated: r.get("updated"),
        version: r.get("version"),
        steps: Vec::new(),
    })
}

fn limit_from_column(column: &str, value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Database(format!("negative {column}: {value}")))
}

fn limit_to_column(column: &str, value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::Database(format!("{column} out of range: {value}")))
}

/// Insert a stage on an existing connection so it can join a transaction.
pub(crate) async fn insert_stage(conn: &mut PgConnection, stage: &mut Stage) -> Result<()> {
    let depends_on = serde_json::to_value(&stage.depends_on)?;
    let labels = serde_json::to_value(&stage.labels)?;
    let limit = limit_to_column("stage_limit", stage.limit)?;
    let limit_repo = limit_to_column("limit_repo", stage.limit_repo)?;

    let row = sqlx::query(
        r#"INSERT INTO stages (execution_id, repo_id, number, name, kind, stage_type, status, error, err_ignore, exit_code, machine, os, arch, variant, kernel, stage_limit, limit_repo, on_success, on_failure, depends_on, labels, started, stopped, created, updated, version)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, 1)
           RETURNING id"#,
    )
    .bind(stage.execution_id.get())
    .bind(stage.repo_id.get())
    .bind(stage.number)
    .bind(&stage.name)
    .bind(&stage.kind)
    .bind(&stage.stage_type)
    .bind(stage.status.as_str())
    .bind(&stage.error)
    .bind(stage.err_ignore)
    .bind(stage.exit_code)
    .bind(&stage.machine)
    .bind(&stage.os)
    .bind(&stage.arch)
    .bind(&stage.variant)
    .bind(&stage.kernel)
    .bind(limit)
    .bind(limit_repo)
    .bind(stage.on_success)
    .bind(stage.on_failure)
    .bind(&depends_on)
    .bind(&labels)
    .bind(stage.started)
    .bind(stage.stopped)
    .bind(stage.created)
    .bind(stage.updated)
    .fetch_one(conn)
    .await
    .map_err(db_err)?;

    stage.id = StageId::new(row.get("id"));
    stage.version = 1;
    Ok(())
}

#[async_trait]
impl StageStore for PgStageStore {
    async fn find(&self, id: StageId) -> Result<Option<Stage>> {
        let row = sqlx::query(&format!("SELECT {STAGE_COLUMNS} FROM stages WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(row_to_stage).transpose()
    }

    async fn create(&self, stage: &mut Stage) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        insert_stage(&mut *conn, stage).await
    }

    async fn update(&self, stage: &mut Stage) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"UPDATE stages SET status = $3, error = $4, err_ignore = $5, exit_code = $6, machine = $7,
                   started = $8, stopped = $9, on_success = $10, on_failure = $11, depends_on = $12,
                   labels = $13, updated = $14, version = version + 1
               WHERE id = $1 AND version = $2"#,
        )
        .bind(stage.id.get())
        .bind(stage.version)
        .bind(stage.status.as_str())
        .bind(&stage.error)
        .bind(stage.err_ignore)
        .bind(stage.exit_code)
        .bind(&stage.machine)
        .bind(stage.started)
        .bind(stage.stopped)
        .bind(stage.on_success)
        .bind(stage.on_failure)
        .bind(serde_json::to_value(&stage.depends_on)?)
        .bind(serde_json::to_value(&stage.labels)?)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        check_version(result.rows_affected())?;
        stage.version += 1;
        stage.updated = now;
        Ok(())
    }

    async fn list_incomplete(&self) -> Result<Vec<Stage>> {
        self.query_stages(
            &format!(
                "SELECT {STAGE_COLUMNS} FROM stages WHERE status IN ('pending', 'running') ORDER BY id ASC"
            ),
            None,
        )
        .await
    }

    async fn list(&self, execution_id: ExecutionId) -> Result<Vec<Stage>> {
        self.query_stages(
            &format!("SELECT {STAGE_COLUMNS} FROM stages WHERE execution_id = $1 ORDER BY number ASC"),
            Some(execution_id),
        )
        .await
    }

    async fn list_with_steps(&self, execution_id: ExecutionId) -> Result<Vec<Stage>> {
        let mut stages = self.list(execution_id).await?;
        let ids: Vec<i64> = stages.iter().map(|s| s.id.get()).collect();

        let rows = sqlx::query(&format!(
            "SELECT {} FROM steps WHERE stage_id = ANY($1) ORDER BY stage_id ASC, number ASC",
            super::step::STEP_COLUMNS
        ))
        .bind(ids.as_slice())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        for row in &rows {
            let step = super::step::row_to_step(row)?;
            let stage = stages
                .iter_mut()
                .find(|s| s.id == step.stage_id)
                .ok_or_else(|| Error::Internal(format!("orphaned step {}", step.id)))?;
            stage.steps.push(step);
        }
        Ok(stages)
    }
}
