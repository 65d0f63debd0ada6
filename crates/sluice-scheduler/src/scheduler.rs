//! Scheduler facade over the queue and the cancellation signal.

use crate::config::SchedulerConfig;
use crate::queue::Queue;
use crate::signal::CancelSignal;
use async_trait::async_trait;
use sluice_core::ports::{DistributedMutex, StageStore};
use sluice_core::{ExecutionId, Filter, Result, Stage};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Hands stages to agents and relays cancellation to them.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Make a pending stage eligible for delivery.
    async fn schedule(&self, stage: &Stage) -> Result<()>;

    /// Block until a matching stage is available or `cancel` fires.
    async fn request(&self, filter: Filter, cancel: &CancellationToken) -> Result<Stage>;

    /// Notify watchers that an execution was cancelled.
    async fn cancel(&self, execution_id: ExecutionId) -> Result<()>;

    /// Block until the execution is cancelled or `cancel` fires.
    async fn cancelled(&self, execution_id: ExecutionId, cancel: &CancellationToken)
    -> Result<bool>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;
}

/// The default scheduler: a matching queue plus an in-process cancel signal.
pub struct QueueScheduler {
    queue: Arc<Queue>,
    signal: CancelSignal,
}

impl QueueScheduler {
    pub fn new(
        stages: Arc<dyn StageStore>,
        mutex: Arc<dyn DistributedMutex>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            queue: Arc::new(Queue::new(stages, mutex, config.queue_interval())),
            signal: CancelSignal::new(config.cancel_ttl()),
        }
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Spawn the queue's matching loop.
    pub fn start(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.queue.start(shutdown)
    }
}

#[async_trait]
impl Scheduler for QueueScheduler {
    async fn schedule(&self, stage: &Stage) -> Result<()> {
        self.queue.schedule(stage).await
    }

    async fn request(&self, filter: Filter, cancel: &CancellationToken) -> Result<Stage> {
        self.queue.request(filter, cancel).await
    }

    async fn cancel(&self, execution_id: ExecutionId) -> Result<()> {
        self.signal.cancel(execution_id).await
    }

    async fn cancelled(
        &self,
        execution_id: ExecutionId,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.signal.cancelled(execution_id, cancel).await
    }

    async fn pause(&self) -> Result<()> {
        self.queue.pause().await
    }

    async fn resume(&self) -> Result<()> {
        self.queue.resume().await
    }
}
