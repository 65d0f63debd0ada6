//! PostgreSQL implementation of StepStore.

use super::{check_version, db_err};
use async_trait::async_trait;
use sluice_core::ports::StepStore;
use sluice_core::{Result, StageId, Status, Step, StepId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

pub(crate) const STEP_COLUMNS: &str = "id, stage_id, number, name, status, error, err_ignore, exit_code, image, detached, depends_on, started, stopped, version";

/// PostgreSQL implementation of StepStore.
pub struct PgStepStore {
    pool: PgPool,
}

impl PgStepStore {
    /// Create a new PgStepStore.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn row_to_step(r: &PgRow) -> Result<Step> {
    let status: String = r.get("status");
    Ok(Step {
        id: StepId::new(r.get("id")),
        stage_id: StageId::new(r.get("stage_id")),
        number: r.get("number"),
        name: r.get("name"),
        status: status.parse::<Status>()?,
        error: r.get("error"),
        err_ignore: r.get("err_ignore"),
        exit_code: r.get("exit_code"),
        image: r.get("image"),
        detached: r.get("detached"),
        depends_on: serde_json::from_value(r.get("depends_on"))?,
        started: r.get("started"),
        stopped: r.get("stopped"),
        version: r.get("version"),
    })
}

#[async_trait]
impl StepStore for PgStepStore {
    async fn find(&self, id: StepId) -> Result<Option<Step>> {
        let row = sqlx::query(&format!("SELECT {STEP_COLUMNS} FROM steps WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(row_to_step).transpose()
    }

    async fn create(&self, step: &mut Step) -> Result<()> {
        let row = sqlx::query(
            r#"INSERT INTO steps (stage_id, number, name, status, error, err_ignore, exit_code, image, detached, depends_on, started, stopped, version)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 1)
               RETURNING id"#,
        )
        .bind(step.stage_id.get())
        .bind(step.number)
        .bind(&step.name)
        .bind(step.status.as_str())
        .bind(&step.error)
        .bind(step.err_ignore)
        .bind(step.exit_code)
        .bind(&step.image)
        .bind(step.detached)
        .bind(serde_json::to_value(&step.depends_on)?)
        .bind(step.started)
        .bind(step.stopped)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        step.id = StepId::new(row.get("id"));
        step.version = 1;
        Ok(())
    }

    async fn update(&self, step: &mut Step) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE steps SET status = $3, error = $4, err_ignore = $5, exit_code = $6,
                   started = $7, stopped = $8, version = version + 1
               WHERE id = $1 AND version = $2"#,
        )
        .bind(step.id.get())
        .bind(step.version)
        .bind(step.status.as_str())
        .bind(&step.error)
        .bind(step.err_ignore)
        .bind(step.exit_code)
        .bind(step.started)
        .bind(step.stopped)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        check_version(result.rows_affected())?;
        step.version += 1;
        Ok(())
    }
}
