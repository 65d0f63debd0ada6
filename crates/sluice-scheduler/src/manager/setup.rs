//! Stage start-up: persists the claimed stage, creates its steps, and flips
//! the execution to running on the first stage.

use crate::context::Adapters;
use chrono::Utc;
use sluice_core::events::Event;
use sluice_core::execution::{MAX_ERROR_LEN, truncate};
use sluice_core::{Error, Execution, Result, Stage, Status};
use tracing::{debug, error, info, warn};

pub(crate) struct Setup {
    adapters: Adapters,
}

impl Setup {
    pub(crate) fn new(adapters: Adapters) -> Self {
        Self { adapters }
    }

    pub(crate) async fn run(&self, stage: &mut Stage) -> Result<()> {
        let mut execution = self
            .adapters
            .executions
            .find(stage.execution_id)
            .await?
            .ok_or_else(|| Error::ExecutionNotFound(stage.execution_id.to_string()))?;

        truncate(&mut stage.error, MAX_ERROR_LEN);
        self.adapters
            .stages
            .update(stage)
            .await
            .inspect_err(|e| error!(error = %e, "manager: cannot update stage"))?;

        let stage_id = stage.id;
        for step in stage.steps.iter_mut() {
            step.stage_id = stage_id;
            truncate(&mut step.error, MAX_ERROR_LEN);
            self.adapters
                .steps
                .create(step)
                .await
                .inspect_err(|e| error!(error = %e, step.name = %step.name, "manager: cannot create step"))?;
        }

        if self.update_execution(&mut execution).await? {
            info!(execution.id = %execution.id, "manager: execution running");
        }

        execution.stages = self.adapters.stages.list_with_steps(execution.id).await?;

        if let Err(e) = self.adapters.events.publish(Event::running(execution.clone())).await {
            warn!(error = %e, "manager: cannot publish execution running event");
        }

        self.write_check(&execution).await;
        Ok(())
    }

    /// Flip a pending execution to running. Losing the race to a sibling
    /// stage that already did it is not an error.
    async fn update_execution(&self, execution: &mut Execution) -> Result<bool> {
        if execution.status != Status::Pending {
            return Ok(false);
        }

        execution.status = Status::Running;
        execution.started = Some(Utc::now());
        match self.adapters.executions.update(execution).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_version_conflict() => {
                debug!(execution.id = %execution.id, "manager: execution already started by a sibling stage");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn write_check(&self, execution: &Execution) {
        let pipeline = match self.adapters.pipelines.find(execution.pipeline_id).await {
            Ok(Some(pipeline)) => pipeline,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "manager: cannot find pipeline for status check");
                return;
            }
        };
        if let Err(e) = self.adapters.checks.write(execution, &pipeline).await {
            warn!(error = %e, "manager: cannot write status check");
        }
    }
}
