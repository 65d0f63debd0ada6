//! Step progress: persists a step and broadcasts the refreshed execution.

use crate::context::Adapters;
use sluice_core::events::Event;
use sluice_core::execution::{MAX_ERROR_LEN, truncate};
use sluice_core::{Error, Result, Step};
use tracing::{error, warn};

pub(crate) struct Updater {
    adapters: Adapters,
}

impl Updater {
    pub(crate) fn new(adapters: Adapters) -> Self {
        Self { adapters }
    }

    pub(crate) async fn run(&self, step: &mut Step) -> Result<()> {
        truncate(&mut step.error, MAX_ERROR_LEN);
        self.adapters
            .steps
            .update(step)
            .await
            .inspect_err(|e| error!(error = %e, "manager: cannot update step"))?;

        let stage = self
            .adapters
            .stages
            .find(step.stage_id)
            .await?
            .ok_or_else(|| Error::StageNotFound(step.stage_id.to_string()))?;
        let mut execution = self
            .adapters
            .executions
            .find(stage.execution_id)
            .await?
            .ok_or_else(|| Error::ExecutionNotFound(stage.execution_id.to_string()))?;
        execution.stages = self.adapters.stages.list_with_steps(execution.id).await?;

        if let Err(e) = self.adapters.events.publish(Event::updated(execution)).await {
            warn!(error = %e, "manager: cannot publish execution updated event");
        }
        Ok(())
    }
}
