//! An in-process engine and agent simulation for scenario tests.

use crate::fixtures::{HookFixture, PipelineFixture, RepoFixture};
use crate::memory::MemoryAdapters;
use chrono::Utc;
use sluice_core::hook::Hook;
use sluice_core::pipeline::{Manifest, Pipeline, Repository};
use sluice_core::{Execution, Filter, LogLine, Result, Stage, Status, Step};
use sluice_scheduler::{
    Canceler, ExecutionManager, LocalMutex, QueueScheduler, Scheduler, SchedulerConfig, Triggerer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Every orchestration service wired to in-memory adapters, with the queue
/// loop running. Dropping the engine stops the loop.
pub struct Engine {
    pub memory: MemoryAdapters,
    pub scheduler: Arc<QueueScheduler>,
    pub triggerer: Triggerer,
    pub manager: ExecutionManager,
    pub canceler: Canceler,
    pub repo: Repository,
    pub pipeline: Pipeline,
    shutdown: CancellationToken,
    queue_loop: Option<JoinHandle<()>>,
}

impl Engine {
    /// Must be called from within a tokio runtime.
    pub fn start() -> Self {
        Self::start_with(RepoFixture::acme(), SchedulerConfig::default())
    }

    pub fn start_with(repo: Repository, config: SchedulerConfig) -> Self {
        let memory = MemoryAdapters::new();
        let adapters = memory.adapters();
        let scheduler = Arc::new(QueueScheduler::new(
            adapters.stages.clone(),
            Arc::new(LocalMutex::new()),
            &config,
        ));
        let shutdown = CancellationToken::new();
        let queue_loop = scheduler.start(shutdown.clone());

        let dyn_scheduler: Arc<dyn Scheduler> = scheduler.clone();
        let pipeline = memory.store.insert_pipeline(PipelineFixture::for_repo(&repo));

        Self {
            triggerer: Triggerer::new(adapters.clone(), dyn_scheduler.clone()),
            manager: ExecutionManager::new(adapters.clone(), dyn_scheduler.clone()),
            canceler: Canceler::new(adapters, dyn_scheduler),
            memory,
            scheduler,
            repo,
            pipeline,
            shutdown,
            queue_loop: Some(queue_loop),
        }
    }

    /// Trigger the manifest for a push to `main`.
    pub async fn trigger(&self, manifest: &Manifest) -> Result<Option<Execution>> {
        self.trigger_hook(&HookFixture::push("main"), manifest).await
    }

    pub async fn trigger_hook(&self, hook: &Hook, manifest: &Manifest) -> Result<Option<Execution>> {
        self.triggerer
            .trigger(&self.repo, &self.pipeline, hook, manifest)
            .await
    }

    /// Poll for a stage, giving up with `Error::Cancelled` after `timeout`.
    pub async fn poll(&self, filter: Filter, timeout: Duration) -> Result<Stage> {
        let token = CancellationToken::new();
        let timer = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        };
        let result = self.manager.request(filter, &token).await;
        timer.abort();
        result
    }

    /// Poll with the default filter and accept whatever is delivered.
    pub async fn claim(&self, machine: &str) -> Result<Stage> {
        let stage = self.poll(Filter::default(), Duration::from_secs(5)).await?;
        self.manager.accept(stage.id, machine).await
    }

    /// Set up an accepted stage with a single running step and write one
    /// log line to it.
    pub async fn start_stage(&self, stage: &mut Stage) -> Result<()> {
        let now = Utc::now();
        stage.started = Some(now);
        stage.steps = vec![Step {
            number: 1,
            name: "run".to_string(),
            status: Status::Pending,
            ..Default::default()
        }];
        self.manager.before_stage(stage).await?;

        let step = &mut stage.steps[0];
        step.status = Status::Running;
        step.started = Some(now);
        self.manager.before_step(step).await?;

        let line = LogLine {
            number: 0,
            message: format!("running {}", stage.name),
            timestamp: 0,
        };
        self.manager.write(stage.steps[0].id, &line).await
    }

    /// Finish the step and the stage of a started stage with `outcome`.
    pub async fn finish_stage(&self, stage: &mut Stage, outcome: Status) -> Result<()> {
        let exit_code = if outcome == Status::Success { 0 } else { 1 };
        let step = &mut stage.steps[0];
        step.status = outcome;
        step.exit_code = exit_code;
        step.stopped = Some(Utc::now());
        self.manager.after_step(step).await?;

        stage.status = outcome;
        stage.exit_code = exit_code;
        stage.stopped = Some(Utc::now());
        self.manager.after_stage(stage).await
    }

    pub async fn run_stage(&self, stage: &mut Stage, outcome: Status) -> Result<()> {
        self.start_stage(stage).await?;
        self.finish_stage(stage, outcome).await
    }

    /// Claim the next stage and run it to `outcome`. Returns the stage name.
    pub async fn claim_and_run(&self, machine: &str, outcome: Status) -> Result<String> {
        let mut stage = self.claim(machine).await?;
        self.run_stage(&mut stage, outcome).await?;
        Ok(stage.name)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.queue_loop.take() {
            handle.abort();
        }
    }
}

/// Wait for a condition with timeout.
pub async fn wait_for<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Assert that a future completes within a timeout.
pub async fn assert_completes_within<F, T>(future: F, timeout: Duration) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(timeout, future)
        .await
        .expect("Operation timed out")
}
