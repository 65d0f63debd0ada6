//! The set of adapters the orchestration services are wired with.

use sluice_core::ports::{
    CheckReporter, EventBus, ExecutionReporter, ExecutionStore, LogStream, PipelineStore,
    StageStore, StepStore,
};
use std::sync::Arc;

/// Shared handles to every port the orchestration services talk to.
#[derive(Clone)]
pub struct Adapters {
    pub executions: Arc<dyn ExecutionStore>,
    pub stages: Arc<dyn StageStore>,
    pub steps: Arc<dyn StepStore>,
    pub pipelines: Arc<dyn PipelineStore>,
    pub events: Arc<dyn EventBus>,
    pub logs: Arc<dyn LogStream>,
    pub checks: Arc<dyn CheckReporter>,
    pub reporter: Arc<dyn ExecutionReporter>,
}
