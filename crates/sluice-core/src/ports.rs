//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the orchestration core and its
//! adapters. Every `update` is a conditional write keyed on the record's
//! `version`: on success the stored and in-memory versions are both bumped,
//! on mismatch the call fails with [`Error::VersionConflict`](crate::Error).

use crate::events::Event;
use crate::execution::{Execution, LogLine, Stage, Step};
use crate::ids::*;
use crate::pipeline::Pipeline;
use crate::Result;
use async_trait::async_trait;

/// Store for executions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Get an execution by ID.
    async fn find(&self, id: ExecutionId) -> Result<Option<Execution>>;

    /// Insert an execution, assigning its id.
    async fn create(&self, execution: &mut Execution) -> Result<()>;

    /// Insert an execution and its stages in one transaction, assigning ids.
    async fn create_with_stages(&self, execution: &mut Execution, stages: &mut [Stage])
    -> Result<()>;

    /// Conditionally update an execution.
    async fn update(&self, execution: &mut Execution) -> Result<()>;
}

/// Store for stages.
#[async_trait]
pub trait StageStore: Send + Sync {
    /// Get a stage by ID, without steps.
    async fn find(&self, id: StageId) -> Result<Option<Stage>>;

    /// Insert a stage, assigning its id.
    async fn create(&self, stage: &mut Stage) -> Result<()>;

    /// Conditionally update a stage. Steps are not written.
    async fn update(&self, stage: &mut Stage) -> Result<()>;

    /// Stages in Pending or Running status across all executions, ordered by id.
    async fn list_incomplete(&self) -> Result<Vec<Stage>>;

    /// Stages of one execution ordered by number, without steps.
    async fn list(&self, execution_id: ExecutionId) -> Result<Vec<Stage>>;

    /// Stages of one execution ordered by number, each with its steps.
    async fn list_with_steps(&self, execution_id: ExecutionId) -> Result<Vec<Stage>>;
}

/// Store for steps.
#[async_trait]
pub trait StepStore: Send + Sync {
    async fn find(&self, id: StepId) -> Result<Option<Step>>;

    /// Insert a step, assigning its id.
    async fn create(&self, step: &mut Step) -> Result<()>;

    /// Conditionally update a step.
    async fn update(&self, step: &mut Step) -> Result<()>;
}

/// Store for pipelines.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn find(&self, id: PipelineId) -> Result<Option<Pipeline>>;

    /// Bump the pipeline's sequence number and return the updated pipeline.
    /// Retries internally on version conflicts.
    async fn increment_seq_num(&self, pipeline: &Pipeline) -> Result<Pipeline>;
}

/// Lock shared by every replica running a matching loop.
#[async_trait]
pub trait DistributedMutex: Send + Sync {
    async fn lock(&self) -> Result<()>;

    async fn unlock(&self) -> Result<()>;
}

/// Event bus for publishing execution events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: Event) -> Result<()>;
}

/// Live log streams, one per running step.
#[async_trait]
pub trait LogStream: Send + Sync {
    async fn create(&self, step_id: StepId) -> Result<()>;

    async fn write(&self, step_id: StepId, line: &LogLine) -> Result<()>;

    /// Fails with `Error::StreamNotFound` when no stream is open.
    async fn delete(&self, step_id: StepId) -> Result<()>;
}

/// Commit status reporter for the code host.
#[async_trait]
pub trait CheckReporter: Send + Sync {
    async fn write(&self, execution: &Execution, pipeline: &Pipeline) -> Result<()>;
}

/// Telemetry sink notified once per finished execution.
#[async_trait]
pub trait ExecutionReporter: Send + Sync {
    async fn executed(&self, execution: &Execution) -> Result<()>;
}
