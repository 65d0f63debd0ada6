//! Stage completion: persists the finished stage, cascades skip and schedule
//! decisions to downstream stages, and rolls the execution up once every
//! stage is done.

use crate::context::Adapters;
use crate::scheduler::Scheduler;
use chrono::Utc;
use sluice_core::events::Event;
use sluice_core::execution::{MAX_ERROR_LEN, truncate};
use sluice_core::{Error, Execution, Result, Stage, Status};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub(crate) struct Teardown {
    adapters: Adapters,
    scheduler: Arc<dyn Scheduler>,
}

impl Teardown {
    pub(crate) fn new(adapters: Adapters, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            adapters,
            scheduler,
        }
    }

    pub(crate) async fn run(&self, stage: &mut Stage) -> Result<()> {
        let mut execution = self
            .adapters
            .executions
            .find(stage.execution_id)
            .await?
            .ok_or_else(|| Error::ExecutionNotFound(stage.execution_id.to_string()))?;

        for step in stage.steps.iter_mut() {
            truncate(&mut step.error, MAX_ERROR_LEN);
            self.adapters
                .steps
                .update(step)
                .await
                .inspect_err(|e| error!(error = %e, step.name = %step.name, "manager: cannot persist step"))?;
        }

        truncate(&mut stage.error, MAX_ERROR_LEN);
        self.adapters
            .stages
            .update(stage)
            .await
            .inspect_err(|e| error!(error = %e, "manager: cannot update the stage"))?;

        for step in &stage.steps {
            match self.adapters.logs.delete(step.id).await {
                Ok(()) | Err(Error::StreamNotFound(_)) => {}
                Err(e) => warn!(error = %e, step.id = %step.id, "manager: cannot teardown log stream"),
            }
        }

        let mut stages = self.adapters.stages.list_with_steps(execution.id).await?;

        self.cancel_downstream(&mut stages).await;
        self.schedule_downstream(&mut stages).await;

        if !is_execution_complete(&stages) {
            debug!(execution.id = %execution.id, "manager: execution has stages still in flight");
            return Ok(());
        }

        let now = Utc::now();
        execution.status = roll_up(&stages);
        execution.finished = Some(now);
        if execution.started.is_none() {
            execution.started = Some(now);
        }

        match self.adapters.executions.update(&mut execution).await {
            Ok(()) => {}
            Err(e) if e.is_version_conflict() => {
                // another teardown finished the execution first
                warn!(execution.id = %execution.id, "manager: execution already finalized");
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "manager: cannot update execution status");
                return Err(e);
            }
        }

        info!(execution.id = %execution.id, status = %execution.status, "manager: execution complete");
        execution.stages = stages;

        if let Err(e) = self.adapters.events.publish(Event::completed(execution.clone())).await {
            warn!(error = %e, "manager: cannot publish execution completed event");
        }
        if let Err(e) = self.adapters.reporter.executed(&execution).await {
            warn!(error = %e, "manager: cannot report execution");
        }
        self.write_check(&execution).await;
        Ok(())
    }

    /// Skip every waiting stage whose dependencies are done and whose
    /// run-on condition rules it out. Repeats until nothing changes, so a
    /// skip propagates through chains of waiting stages.
    async fn cancel_downstream(&self, stages: &mut [Stage]) {
        let failed = stages.iter().any(|s| s.status.is_failed());

        loop {
            let mut changed = false;
            for i in 0..stages.len() {
                if stages[i].status != Status::WaitingOnDeps {
                    continue;
                }
                let skip = if failed {
                    !stages[i].on_failure
                } else {
                    !stages[i].on_success
                };
                if !skip || !are_deps_complete(&stages[i], stages) {
                    continue;
                }

                let now = Utc::now();
                let stage = &mut stages[i];
                stage.status = Status::Skipped;
                stage.started = Some(now);
                stage.stopped = Some(now);

                match self.adapters.stages.update(stage).await {
                    Ok(()) => {
                        changed = true;
                        debug!(stage.name = %stage.name, "manager: downstream stage skipped");
                    }
                    Err(e) if e.is_version_conflict() => {
                        if let Err(e) = self.resync(stage).await {
                            warn!(error = %e, stage.id = %stage.id, "manager: cannot resync stage");
                        }
                    }
                    Err(e) => error!(error = %e, stage.id = %stage.id, "manager: cannot skip downstream stage"),
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Move waiting stages whose dependencies are all done to pending and
    /// hand them to the scheduler.
    async fn schedule_downstream(&self, stages: &mut [Stage]) {
        for i in 0..stages.len() {
            if stages[i].status != Status::WaitingOnDeps || stages[i].depends_on.is_empty() {
                continue;
            }
            if !are_deps_complete(&stages[i], stages) {
                continue;
            }

            let stage = &mut stages[i];
            stage.status = Status::Pending;
            match self.adapters.stages.update(stage).await {
                Ok(()) => {}
                Err(e) if e.is_version_conflict() => {
                    if let Err(e) = self.resync(stage).await {
                        warn!(error = %e, stage.id = %stage.id, "manager: cannot resync stage");
                    }
                    continue;
                }
                Err(e) => {
                    error!(error = %e, stage.id = %stage.id, "manager: cannot update downstream stage");
                    continue;
                }
            }

            if let Err(e) = self.scheduler.schedule(stage).await {
                error!(error = %e, stage.id = %stage.id, "manager: cannot schedule downstream stage");
            } else {
                debug!(stage.name = %stage.name, "manager: downstream stage scheduled");
            }
        }
    }

    /// Refresh the status fields of `stage` from the store. The version is
    /// left alone, so a later write of this copy still conflicts.
    async fn resync(&self, stage: &mut Stage) -> Result<()> {
        let updated = self
            .adapters
            .stages
            .find(stage.id)
            .await?
            .ok_or_else(|| Error::StageNotFound(stage.id.to_string()))?;

        stage.status = updated.status;
        stage.error = updated.error;
        stage.exit_code = updated.exit_code;
        stage.machine = updated.machine;
        stage.started = updated.started;
        stage.stopped = updated.stopped;
        stage.created = updated.created;
        stage.updated = updated.updated;
        Ok(())
    }

    async fn write_check(&self, execution: &Execution) {
        match self.adapters.pipelines.find(execution.pipeline_id).await {
            Ok(Some(pipeline)) => {
                if let Err(e) = self.adapters.checks.write(execution, &pipeline).await {
                    warn!(error = %e, "manager: cannot write status check");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "manager: cannot find pipeline for status check"),
        }
    }
}

/// True when every sibling named in `stage.depends_on` is done.
pub(crate) fn are_deps_complete(stage: &Stage, stages: &[Stage]) -> bool {
    let deps: HashSet<&str> = stage.depends_on.iter().map(String::as_str).collect();
    stages
        .iter()
        .filter(|s| deps.contains(s.name.as_str()))
        .all(|s| s.status.is_done())
}

/// An execution stays open while any stage is in flight, waiting, declined,
/// or blocked.
pub(crate) fn is_execution_complete(stages: &[Stage]) -> bool {
    !stages.iter().any(|s| {
        matches!(
            s.status,
            Status::Pending
                | Status::Running
                | Status::WaitingOnDeps
                | Status::Declined
                | Status::Blocked
        )
    })
}

/// Killed outranks Failure, which outranks Error; otherwise Success.
pub(crate) fn roll_up(stages: &[Stage]) -> Status {
    [Status::Killed, Status::Failure, Status::Error]
        .into_iter()
        .find(|status| stages.iter().any(|s| s.status == *status))
        .unwrap_or(Status::Success)
}
