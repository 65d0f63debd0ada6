//! Stage and execution factory.
//!
//! Turns a hook and the parsed pipeline documents into a persisted execution
//! with one stage per matching document, then schedules the stages that have
//! nothing left to wait on.

use crate::context::Adapters;
use crate::dag::{DagBuilder, StageDag};
use crate::scheduler::Scheduler;
use crate::triggers::TriggerMatcher;
use chrono::{DateTime, Utc};
use sluice_core::execution::{MAX_ERROR_LEN, MAX_MESSAGE_LEN, truncate};
use sluice_core::hook::Hook;
use sluice_core::pipeline::{Document, Manifest, Pipeline, Repository};
use sluice_core::{Execution, Result, Stage, Status};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, warn};

const DEFAULT_NAME: &str = "default";
const DEFAULT_KIND: &str = "pipeline";
const DEFAULT_TYPE: &str = "docker";
const DEFAULT_OS: &str = "linux";
const DEFAULT_ARCH: &str = "amd64";

pub struct Triggerer {
    adapters: Adapters,
    scheduler: Arc<dyn Scheduler>,
    matcher: TriggerMatcher,
}

impl Triggerer {
    pub fn new(adapters: Adapters, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            adapters,
            scheduler,
            matcher: TriggerMatcher::new(),
        }
    }

    /// Create and schedule an execution for `hook`.
    ///
    /// Returns `Ok(None)` when nothing should run: the commit asked to skip
    /// CI, or no document matched. A malformed dependency graph is not an
    /// error to the caller; it produces an execution in `Error` status.
    pub async fn trigger(
        &self,
        repo: &Repository,
        pipeline: &Pipeline,
        hook: &Hook,
        manifest: &Manifest,
    ) -> Result<Option<Execution>> {
        let span = sluice_trace::trigger_span(&repo.path, &hook.event, &hook.git_ref);
        self.trigger_inner(repo, pipeline, hook, manifest)
            .instrument(span)
            .await
    }

    async fn trigger_inner(
        &self,
        repo: &Repository,
        pipeline: &Pipeline,
        hook: &Hook,
        manifest: &Manifest,
    ) -> Result<Option<Execution>> {
        debug!("trigger: received");

        if self.matcher.has_skip_directive(hook) {
            info!("trigger: skipping hook, commit message requests skip");
            return Ok(None);
        }

        let mut builder = DagBuilder::new();
        let mut matched = Vec::new();
        for doc in &manifest.documents {
            let name = document_name(doc);
            builder.add(name, &doc.depends_on);

            match self.matcher.skip_reason(doc, hook, repo) {
                Some(reason) => {
                    info!(
                        stage.name = name,
                        reason = reason.as_str(),
                        "trigger: skipping pipeline, does not match {}",
                        reason.as_str()
                    );
                }
                None => {
                    builder.set_skip(false);
                    matched.push(doc);
                }
            }
        }

        let dag = match builder.build() {
            Ok(dag) => dag,
            Err(e) => {
                warn!(error = %e, "trigger: invalid dependency graph");
                let message = format!("Error: {e}");
                return self
                    .create_execution_with_error(repo, pipeline, hook, &message)
                    .await
                    .map(Some);
            }
        };

        if matched.is_empty() {
            info!("trigger: skipping execution, no matching pipelines");
            return Ok(None);
        }

        let pipeline = self.adapters.pipelines.increment_seq_num(pipeline).await?;
        let now = Utc::now();

        let mut execution = new_execution(repo, &pipeline, hook, now);
        let mut stages: Vec<Stage> = matched
            .iter()
            .enumerate()
            .map(|(i, doc)| self.new_stage(repo, doc, i, &dag, now))
            .collect();

        self.adapters
            .executions
            .create_with_stages(&mut execution, &mut stages)
            .await
            .inspect_err(|e| error!(error = %e, "trigger: cannot create execution"))?;

        if let Err(e) = self.adapters.checks.write(&execution, &pipeline).await {
            warn!(error = %e, "trigger: cannot create status check");
        }

        for stage in stages.iter().filter(|s| s.status == Status::Pending) {
            self.scheduler
                .schedule(stage)
                .await
                .inspect_err(|e| error!(error = %e, stage.id = %stage.id, "trigger: cannot enqueue stage"))?;
        }

        info!(
            execution.id = %execution.id,
            execution.number = execution.number,
            stages = stages.len(),
            "trigger: execution created"
        );
        execution.stages = stages;
        Ok(Some(execution))
    }

    /// Persist an execution that failed before any stage could be built.
    /// It still consumes a sequence number so the failure is visible.
    pub async fn create_execution_with_error(
        &self,
        repo: &Repository,
        pipeline: &Pipeline,
        hook: &Hook,
        message: &str,
    ) -> Result<Execution> {
        let pipeline = self.adapters.pipelines.increment_seq_num(pipeline).await?;
        let now = Utc::now();

        let mut execution = new_execution(repo, &pipeline, hook, now);
        execution.status = Status::Error;
        execution.error = message.to_string();
        truncate(&mut execution.error, MAX_ERROR_LEN);
        execution.started = Some(now);
        execution.finished = Some(now);

        self.adapters.executions.create(&mut execution).await?;

        if let Err(e) = self.adapters.checks.write(&execution, &pipeline).await {
            warn!(error = %e, "trigger: cannot create status check");
        }

        info!(execution.id = %execution.id, error = %execution.error, "trigger: execution created in error state");
        Ok(execution)
    }

    fn new_stage(
        &self,
        repo: &Repository,
        doc: &Document,
        index: usize,
        dag: &StageDag,
        now: DateTime<Utc>,
    ) -> Stage {
        let name = document_name(doc);
        let kind = or_default(&doc.kind, DEFAULT_KIND);
        let stage_type = if doc.doc_type.is_empty() && kind == DEFAULT_KIND {
            DEFAULT_TYPE.to_string()
        } else {
            doc.doc_type.clone()
        };

        let depends_on = dag.dependencies(name);
        let status = if depends_on.is_empty() {
            Status::Pending
        } else {
            Status::WaitingOnDeps
        };

        let on_success = self.matcher.condition_matches(&doc.trigger.status, "success");
        // an empty status condition runs only on success
        let on_failure = !doc.trigger.status.is_empty()
            && self.matcher.condition_matches(&doc.trigger.status, "failure");

        Stage {
            repo_id: repo.id,
            number: index as i64 + 1,
            name: name.to_string(),
            kind,
            stage_type,
            status,
            os: or_default(&doc.platform.os, DEFAULT_OS),
            arch: or_default(&doc.platform.arch, DEFAULT_ARCH),
            variant: doc.platform.variant.clone(),
            kernel: doc.platform.version.clone(),
            limit: doc.concurrency.limit,
            limit_repo: repo.throttle,
            on_success,
            on_failure,
            depends_on,
            labels: doc.node.clone(),
            created: now,
            updated: now,
            ..Default::default()
        }
    }
}

fn document_name(doc: &Document) -> &str {
    if doc.name.is_empty() {
        DEFAULT_NAME
    } else {
        &doc.name
    }
}

fn or_default(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

fn new_execution(
    repo: &Repository,
    pipeline: &Pipeline,
    hook: &Hook,
    now: DateTime<Utc>,
) -> Execution {
    let mut title = hook.title.clone();
    truncate(&mut title, MAX_MESSAGE_LEN);
    let mut message = hook.message.clone();
    truncate(&mut message, MAX_MESSAGE_LEN);

    Execution {
        repo_id: repo.id,
        pipeline_id: pipeline.id,
        number: pipeline.seq,
        status: Status::Pending,
        trigger: hook.trigger.clone(),
        event: hook.event.clone(),
        action: hook.action.clone(),
        cron: hook.cron.clone(),
        git_ref: hook.git_ref.clone(),
        source: hook.source.clone(),
        target: hook.target.clone(),
        before: hook.before.clone(),
        after: hook.after.clone(),
        title,
        message,
        author_login: hook.author_login.clone(),
        author_name: hook.author_name.clone(),
        author_email: hook.author_email.clone(),
        sender: hook.sender.clone(),
        params: hook.params.clone(),
        debug: hook.debug,
        parent: hook.parent,
        created: now,
        updated: now,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::pipeline::{Condition, Conditions, Platform};

    fn matcher_only() -> TriggerMatcher {
        TriggerMatcher::new()
    }

    #[test]
    fn test_new_execution_truncates_commit_text() {
        let hook = Hook {
            title: "t".repeat(2100),
            message: "m".repeat(2001),
            event: "push".into(),
            ..Default::default()
        };
        let pipeline = Pipeline {
            seq: 4,
            ..Default::default()
        };

        let execution = new_execution(&Repository::default(), &pipeline, &hook, Utc::now());
        assert_eq!(execution.title.chars().count(), MAX_MESSAGE_LEN);
        assert_eq!(execution.message.chars().count(), MAX_MESSAGE_LEN);
        assert_eq!(execution.number, 4);
        assert_eq!(execution.status, Status::Pending);
    }

    #[test]
    fn test_status_condition_flags() {
        let matcher = matcher_only();
        let status = Conditions::default().status;
        assert!(matcher.condition_matches(&status, "success"));
        assert!(status.is_empty());

        let both = Condition::include(&["success", "failure"]);
        assert!(matcher.condition_matches(&both, "failure"));

        let failure_only = Condition::include(&["failure"]);
        assert!(!matcher.condition_matches(&failure_only, "success"));
    }

    #[test]
    fn test_document_defaults() {
        let doc = Document {
            kind: String::new(),
            platform: Platform::default(),
            ..Default::default()
        };
        assert_eq!(document_name(&doc), "default");
        assert_eq!(or_default(&doc.kind, DEFAULT_KIND), "pipeline");
        assert_eq!(or_default("arm64", DEFAULT_ARCH), "arm64");
    }
}
