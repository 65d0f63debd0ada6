//! Explicit cancellation of an execution.

use crate::context::Adapters;
use crate::scheduler::Scheduler;
use chrono::Utc;
use sluice_core::events::Event;
use sluice_core::{Execution, Result, Status};
use std::sync::Arc;
use tracing::{Instrument, debug, info, warn};

/// Exit code recorded on steps stopped by a cancel (128 + SIGINT).
pub const CANCELLED_EXIT_CODE: i32 = 130;

pub struct Canceler {
    adapters: Adapters,
    scheduler: Arc<dyn Scheduler>,
}

impl Canceler {
    pub fn new(adapters: Adapters, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            adapters,
            scheduler,
        }
    }

    /// Kill a pending or running execution and every unfinished stage and
    /// step under it. Finished executions are left untouched.
    pub async fn cancel(&self, execution: &mut Execution) -> Result<()> {
        let span = sluice_trace::execution_span(execution);
        self.cancel_inner(execution).instrument(span).await
    }

    async fn cancel_inner(&self, execution: &mut Execution) -> Result<()> {
        match execution.status {
            Status::Pending | Status::Running => {}
            status => {
                debug!(execution.id = %execution.id, %status, "canceler: execution already finished");
                return Ok(());
            }
        }

        let now = Utc::now();
        execution.status = Status::Killed;
        execution.finished = Some(now);
        if execution.started.is_none() {
            execution.started = Some(now);
        }
        self.adapters
            .executions
            .update(execution)
            .await
            .inspect_err(|e| warn!(error = %e, execution.id = %execution.id, "canceler: cannot update execution status"))?;

        if let Err(e) = self.scheduler.cancel(execution.id).await {
            warn!(error = %e, execution.id = %execution.id, "canceler: cannot notify watchers");
        }

        let mut stages = self.adapters.stages.list_with_steps(execution.id).await?;
        for stage in stages.iter_mut() {
            if stage.status.is_done() {
                continue;
            }
            if stage.started.is_some() {
                stage.status = Status::Killed;
            } else {
                stage.status = Status::Skipped;
                stage.started = Some(now);
            }
            stage.stopped = Some(now);
            if let Err(e) = self.adapters.stages.update(stage).await {
                debug!(error = %e, stage.id = %stage.id, "canceler: cannot update stage status");
            }

            for step in stage.steps.iter_mut() {
                if step.status.is_done() {
                    continue;
                }
                if step.started.is_some() {
                    step.status = Status::Killed;
                } else {
                    step.status = Status::Skipped;
                    step.started = Some(now);
                }
                step.stopped = Some(now);
                step.exit_code = CANCELLED_EXIT_CODE;
                if let Err(e) = self.adapters.steps.update(step).await {
                    debug!(error = %e, step.id = %step.id, "canceler: cannot update step status");
                }
            }
        }

        execution.stages = stages;
        info!(execution.id = %execution.id, "canceler: successfully cancelled execution");

        if let Err(e) = self.adapters.events.publish(Event::canceled(execution.clone())).await {
            warn!(error = %e, "canceler: cannot publish execution canceled event");
        }
        Ok(())
    }
}
