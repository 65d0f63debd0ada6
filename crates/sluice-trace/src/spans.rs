//! Span creation for orchestration operations.

use sluice_core::{Execution, Stage, Step};
use tracing::{Level, Span, span};

/// Create a span for trigger evaluation.
pub fn trigger_span(repository: &str, event: &str, git_ref: &str) -> Span {
    span!(
        Level::INFO,
        "execution.trigger",
        vcs.repository = repository,
        vcs.event = event,
        vcs.git_ref = git_ref,
    )
}

/// Create a span for an execution-wide operation such as a cancel.
pub fn execution_span(execution: &Execution) -> Span {
    span!(
        Level::INFO,
        "execution.operation",
        ci.repo.id = execution.repo_id.get(),
        ci.pipeline.id = execution.pipeline_id.get(),
        ci.execution.id = execution.id.get(),
        ci.execution.number = execution.number,
    )
}

/// Create a span for a stage lifecycle callback.
pub fn stage_span(stage: &Stage) -> Span {
    span!(
        Level::INFO,
        "stage.lifecycle",
        ci.execution.id = stage.execution_id.get(),
        ci.stage.id = stage.id.get(),
        ci.stage.name = stage.name.as_str(),
        ci.stage.status = stage.status.as_str(),
        ci.agent.machine = stage.machine.as_str(),
    )
}

/// Create a span for a step lifecycle callback.
pub fn step_span(step: &Step) -> Span {
    span!(
        Level::INFO,
        "step.lifecycle",
        ci.stage.id = step.stage_id.get(),
        ci.step.id = step.id.get(),
        ci.step.name = step.name.as_str(),
        ci.step.status = step.status.as_str(),
    )
}

/// Create a span for one matching pass of the queue.
pub fn queue_span() -> Span {
    span!(Level::DEBUG, "queue.match")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::StageId;

    #[test]
    fn test_spans_build_without_subscriber() {
        let stage = Stage {
            id: StageId::new(3),
            name: "build".into(),
            ..Default::default()
        };
        // Without a subscriber spans are disabled but must still be constructible.
        let span = stage_span(&stage);
        let _entered = span.enter();
        let _ = trigger_span("acme/app", "push", "refs/heads/main");
        let _ = queue_span();
    }
}
