//! Execution events published to subscribers of a repository.

use crate::execution::Execution;
use crate::ids::RepoId;
use serde::{Deserialize, Serialize};

/// Lifecycle events. Each carries the full execution tree as it was read
/// right before publishing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ExecutionRunning(ExecutionPayload),
    ExecutionUpdated(ExecutionPayload),
    ExecutionCompleted(ExecutionPayload),
    ExecutionCanceled(ExecutionPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPayload {
    pub repo_id: RepoId,
    pub execution: Execution,
}

impl ExecutionPayload {
    pub fn new(execution: Execution) -> Self {
        Self {
            repo_id: execution.repo_id,
            execution,
        }
    }
}

impl Event {
    pub fn running(execution: Execution) -> Self {
        Event::ExecutionRunning(ExecutionPayload::new(execution))
    }

    pub fn updated(execution: Execution) -> Self {
        Event::ExecutionUpdated(ExecutionPayload::new(execution))
    }

    pub fn completed(execution: Execution) -> Self {
        Event::ExecutionCompleted(ExecutionPayload::new(execution))
    }

    pub fn canceled(execution: Execution) -> Self {
        Event::ExecutionCanceled(ExecutionPayload::new(execution))
    }

    pub fn payload(&self) -> &ExecutionPayload {
        match self {
            Event::ExecutionRunning(p)
            | Event::ExecutionUpdated(p)
            | Event::ExecutionCompleted(p)
            | Event::ExecutionCanceled(p) => p,
        }
    }

    /// The subscriber scope of the event.
    pub fn scope(&self) -> RepoId {
        self.payload().repo_id
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Event::ExecutionRunning(_) => "execution_running",
            Event::ExecutionUpdated(_) => "execution_updated",
            Event::ExecutionCompleted(_) => "execution_completed",
            Event::ExecutionCanceled(_) => "execution_canceled",
        }
    }

    /// Returns the NATS subject for this event.
    pub fn subject(&self) -> String {
        let p = self.payload();
        let verb = match self {
            Event::ExecutionRunning(_) => "running",
            Event::ExecutionUpdated(_) => "updated",
            Event::ExecutionCompleted(_) => "completed",
            Event::ExecutionCanceled(_) => "canceled",
        };
        format!(
            "execution.{}.{}.{}",
            verb,
            p.repo_id.get(),
            p.execution.id.get()
        )
    }
}
