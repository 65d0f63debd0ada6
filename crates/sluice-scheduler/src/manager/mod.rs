//! Agent-facing lifecycle manager.
//!
//! The outer protocol layer forwards agent calls here: polling for work,
//! claiming a stage, streaming logs, reporting step and stage transitions,
//! and watching for cancellation.

mod setup;
mod teardown;
mod updater;

use crate::context::Adapters;
use crate::scheduler::Scheduler;
use setup::Setup;
use sluice_core::{
    Error, ExecutionId, Filter, LogLine, Result, Stage, StageId, Status, Step, StepId,
};
use std::sync::Arc;
use teardown::Teardown;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};
use updater::Updater;

pub struct ExecutionManager {
    adapters: Adapters,
    scheduler: Arc<dyn Scheduler>,
    setup: Setup,
    updater: Updater,
    teardown: Teardown,
}

impl ExecutionManager {
    pub fn new(adapters: Adapters, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            setup: Setup::new(adapters.clone()),
            updater: Updater::new(adapters.clone()),
            teardown: Teardown::new(adapters.clone(), scheduler.clone()),
            adapters,
            scheduler,
        }
    }

    /// Long-poll for a stage matching `filter`.
    pub async fn request(&self, filter: Filter, cancel: &CancellationToken) -> Result<Stage> {
        debug!(
            kind = %filter.kind,
            r#type = %filter.stage_type,
            os = %filter.os,
            arch = %filter.arch,
            "manager: request queue item"
        );

        match self.scheduler.request(filter, cancel).await {
            Ok(stage) => Ok(stage),
            Err(e) if e.is_cancelled() => {
                debug!("manager: request cancelled by caller");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "manager: request queue item error");
                Err(e)
            }
        }
    }

    /// Claim a delivered stage for `machine`. Fails if another agent got
    /// there first.
    pub async fn accept(&self, stage_id: StageId, machine: &str) -> Result<Stage> {
        let mut stage = self
            .adapters
            .stages
            .find(stage_id)
            .await?
            .ok_or_else(|| Error::StageNotFound(stage_id.to_string()))?;

        if !stage.machine.is_empty() {
            debug!(stage.id = %stage_id, machine = %stage.machine, "manager: stage already assigned");
            return Err(Error::StageAlreadyAssigned {
                machine: stage.machine,
            });
        }

        stage.machine = machine.to_string();
        stage.status = Status::Running;
        match self.adapters.stages.update(&mut stage).await {
            Ok(()) => {
                info!(stage.id = %stage_id, machine, "manager: stage accepted");
                Ok(stage)
            }
            Err(e) if e.is_version_conflict() => {
                debug!(stage.id = %stage_id, "manager: stage processed by another agent");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, stage.id = %stage_id, "manager: cannot accept stage");
                Err(e)
            }
        }
    }

    /// Append a line to the step's live log stream.
    pub async fn write(&self, step_id: StepId, line: &LogLine) -> Result<()> {
        self.adapters
            .logs
            .write(step_id, line)
            .await
            .inspect_err(|e| warn!(error = %e, step.id = %step_id, "manager: cannot write log line"))
    }

    pub async fn before_step(&self, step: &mut Step) -> Result<()> {
        let span = sluice_trace::step_span(step);
        async {
            debug!("manager: updating step status");
            if let Err(e) = self.adapters.logs.create(step.id).await {
                warn!(error = %e, "manager: cannot create log stream");
                return Err(e);
            }
            self.updater.run(step).await
        }
        .instrument(span)
        .await
    }

    pub async fn after_step(&self, step: &mut Step) -> Result<()> {
        let span = sluice_trace::step_span(step);
        async {
            debug!("manager: updating step status");
            let result = self.updater.run(step).await;
            match self.adapters.logs.delete(step.id).await {
                Ok(()) | Err(Error::StreamNotFound(_)) => {}
                Err(e) => warn!(error = %e, "manager: cannot teardown log stream"),
            }
            result
        }
        .instrument(span)
        .await
    }

    pub async fn before_stage(&self, stage: &mut Stage) -> Result<()> {
        let span = sluice_trace::stage_span(stage);
        self.setup.run(stage).instrument(span).await
    }

    pub async fn after_stage(&self, stage: &mut Stage) -> Result<()> {
        let span = sluice_trace::stage_span(stage);
        self.teardown.run(stage).instrument(span).await
    }

    /// Block until the execution is cancelled. Returns `true` when it was
    /// cancelled or has already finished.
    pub async fn watch(&self, execution_id: ExecutionId, cancel: &CancellationToken) -> Result<bool> {
        let cancelled = self
            .scheduler
            .cancelled(execution_id, cancel)
            .await
            .inspect_err(|e| {
                if !e.is_cancelled() {
                    warn!(error = %e, execution.id = %execution_id, "manager: watch failed");
                }
            })?;

        let execution = self
            .adapters
            .executions
            .find(execution_id)
            .await?
            .ok_or_else(|| Error::ExecutionNotFound(execution_id.to_string()))?;
        Ok(cancelled || execution.status.is_done())
    }
}
