//! Stage queue and worker matching.
//!
//! Agents long-poll through [`Queue::request`]. Each poll registers a worker
//! with a single-slot delivery channel. Matching passes walk the incomplete
//! stages in id order and hand each admissible stage to the first registered
//! worker whose filter matches it.

use crate::metrics::QueueMetrics;
use sluice_core::ports::{DistributedMutex, StageStore};
use sluice_core::{Error, Filter, Result, Stage, Status};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

const DEFAULT_KIND: &str = "pipeline";
const DEFAULT_TYPE: &str = "docker";

/// A blocked agent poll.
struct Worker {
    id: u64,
    filter: Filter,
    channel: oneshot::Sender<Stage>,
}

/// Registry and pause flag share one lock so a pass sees them consistently.
#[derive(Default)]
struct QueueState {
    workers: Vec<Worker>,
    paused: bool,
}

pub struct Queue {
    state: Mutex<QueueState>,
    ready: Notify,
    stages: Arc<dyn StageStore>,
    mutex: Arc<dyn DistributedMutex>,
    interval: Duration,
    next_worker: AtomicU64,
    metrics: Arc<QueueMetrics>,
}

impl Queue {
    pub fn new(
        stages: Arc<dyn StageStore>,
        mutex: Arc<dyn DistributedMutex>,
        interval: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            ready: Notify::new(),
            stages,
            mutex,
            interval,
            next_worker: AtomicU64::new(1),
            metrics: QueueMetrics::new(),
        }
    }

    pub fn metrics(&self) -> Arc<QueueMetrics> {
        self.metrics.clone()
    }

    /// Signal that a matching pass should run. Signals raised before the
    /// loop consumes one coalesce into a single pass.
    pub async fn schedule(&self, stage: &Stage) -> Result<()> {
        debug!(stage.id = %stage.id, stage.name = %stage.name, "queue: stage scheduled");
        self.ready.notify_one();
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        self.state.lock().await.paused = true;
        info!("queue: paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        self.state.lock().await.paused = false;
        self.ready.notify_one();
        info!("queue: resumed");
        Ok(())
    }

    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.paused
    }

    /// Number of agents currently waiting for a stage.
    pub async fn waiting(&self) -> usize {
        self.state.lock().await.workers.len()
    }

    /// Block until a stage matching `filter` is delivered, or until `cancel`
    /// fires, in which case the registration is withdrawn and
    /// `Error::Cancelled` is returned.
    pub async fn request(&self, filter: Filter, cancel: &CancellationToken) -> Result<Stage> {
        let (tx, rx) = oneshot::channel();
        let id = self.next_worker.fetch_add(1, Ordering::Relaxed);

        {
            let mut state = self.state.lock().await;
            state.workers.push(Worker {
                id,
                filter,
                channel: tx,
            });
            self.metrics.set_waiting_workers(state.workers.len());
        }
        self.ready.notify_one();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.remove_worker(id).await;
                Err(Error::Cancelled)
            }
            delivered = rx => delivered.map_err(|_| {
                Error::Internal("queue dropped the worker registration".to_string())
            }),
        }
    }

    async fn remove_worker(&self, id: u64) {
        let mut state = self.state.lock().await;
        state.workers.retain(|w| w.id != id);
        self.metrics.set_waiting_workers(state.workers.len());
    }

    /// Spawn the matching loop. It runs a pass whenever the queue is
    /// signalled or the fallback interval elapses, until `shutdown` fires.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move { queue.run(shutdown).await })
    }

    async fn run(&self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "queue: matching loop started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.ready.notified() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }

            let span = sluice_trace::queue_span();
            if let Err(e) = self.signal().instrument(span).await {
                self.metrics.record_aborted_cycle();
                error!(error = %e, "queue: matching pass aborted");
            }
        }
        info!("queue: matching loop stopped");
    }

    /// Run one matching pass under the distributed mutex.
    pub async fn signal(&self) -> Result<()> {
        self.mutex.lock().await?;
        let result = self.match_pending().await;
        if let Err(e) = self.mutex.unlock().await {
            warn!(error = %e, "queue: failed to release distributed mutex");
        }
        result
    }

    async fn match_pending(&self) -> Result<()> {
        {
            let state = self.state.lock().await;
            if state.paused || state.workers.is_empty() {
                return Ok(());
            }
        }

        let items = self.stages.list_incomplete().await?;

        let mut state = self.state.lock().await;
        for item in &items {
            if item.status == Status::Running || !item.machine.is_empty() {
                continue;
            }
            // per-name concurrency limit of the stage
            if !within_limits(item, &items) {
                continue;
            }
            // per-repository throttle
            if should_throttle(item, &items, item.limit_repo) {
                continue;
            }

            let mut i = 0;
            while i < state.workers.len() {
                if !worker_matches(&state.workers[i].filter, item) {
                    i += 1;
                    continue;
                }
                let worker = state.workers.remove(i);
                match worker.channel.send(item.clone()) {
                    Ok(()) => {
                        self.metrics.record_delivery();
                        debug!(stage.id = %item.id, stage.name = %item.name, worker = worker.id, "queue: stage delivered");
                        break;
                    }
                    Err(_) => {
                        // caller went away without withdrawing; try the next worker
                        self.metrics.record_stale_worker();
                    }
                }
            }
        }

        self.metrics.set_waiting_workers(state.workers.len());
        self.metrics.record_cycle();
        Ok(())
    }
}

/// Kind and type must match, with empty values defaulting to
/// `pipeline` and `docker`.
pub fn match_resource(kind_a: &str, type_a: &str, kind_b: &str, type_b: &str) -> bool {
    fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
        if value.is_empty() { default } else { value }
    }
    or_default(kind_a, DEFAULT_KIND) == or_default(kind_b, DEFAULT_KIND)
        && or_default(type_a, DEFAULT_TYPE) == or_default(type_b, DEFAULT_TYPE)
}

/// Resource, platform, and label affinity between a worker and a stage.
pub fn worker_matches(filter: &Filter, stage: &Stage) -> bool {
    if !match_resource(&filter.kind, &filter.stage_type, &stage.kind, &stage.stage_type) {
        return false;
    }
    if filter.is_platform_specific() {
        if filter.os != stage.os || filter.arch != stage.arch {
            return false;
        }
        // an empty variant or kernel on the stage accepts any worker
        if !stage.variant.is_empty() && stage.variant != filter.variant {
            return false;
        }
        if !stage.kernel.is_empty() && stage.kernel != filter.kernel {
            return false;
        }
    }
    // both empty or exactly equal
    stage.labels == filter.labels
}

/// True while fewer than `stage.limit` same-repo, same-name siblings are
/// running or were created earlier.
pub fn within_limits(stage: &Stage, siblings: &[Stage]) -> bool {
    if stage.limit == 0 {
        return true;
    }
    let count = siblings
        .iter()
        .filter(|s| s.repo_id == stage.repo_id && s.id != stage.id && s.name == stage.name)
        .filter(|s| s.id < stage.id || s.status == Status::Running)
        .count();
    count < stage.limit as usize
}

/// True when the repository already has `limit` stages ahead of this one.
pub fn should_throttle(stage: &Stage, siblings: &[Stage], limit: u32) -> bool {
    if limit == 0 {
        return false;
    }
    if stage.status == Status::Running {
        return false;
    }
    let count = siblings
        .iter()
        .filter(|s| s.repo_id == stage.repo_id && s.id < stage.id)
        .count();
    count >= limit as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutex::LocalMutex;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use sluice_core::{ExecutionId, RepoId, StageId};
    use std::collections::VecDeque;

    /// Returns scripted `list_incomplete` results, repeating the last one.
    struct MockStageStore {
        responses: std::sync::Mutex<VecDeque<Vec<Stage>>>,
        fail: bool,
    }

    impl MockStageStore {
        fn new(responses: Vec<Vec<Stage>>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses.into()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                responses: std::sync::Mutex::new(VecDeque::new()),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl StageStore for MockStageStore {
        async fn find(&self, _id: StageId) -> Result<Option<Stage>> {
            Ok(None)
        }

        async fn create(&self, _stage: &mut Stage) -> Result<()> {
            Ok(())
        }

        async fn update(&self, _stage: &mut Stage) -> Result<()> {
            Ok(())
        }

        async fn list_incomplete(&self) -> Result<Vec<Stage>> {
            if self.fail {
                return Err(Error::Database("connection refused".into()));
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                Ok(responses.pop_front().unwrap())
            } else {
                Ok(responses.front().cloned().unwrap_or_default())
            }
        }

        async fn list(&self, _execution_id: ExecutionId) -> Result<Vec<Stage>> {
            Ok(vec![])
        }

        async fn list_with_steps(&self, _execution_id: ExecutionId) -> Result<Vec<Stage>> {
            Ok(vec![])
        }
    }

    fn stage(id: i64) -> Stage {
        Stage {
            id: StageId::new(id),
            repo_id: RepoId::new(1),
            name: "build".into(),
            os: "linux".into(),
            arch: "amd64".into(),
            status: Status::Pending,
            ..Default::default()
        }
    }

    fn queue(store: MockStageStore) -> Arc<Queue> {
        Arc::new(Queue::new(
            Arc::new(store),
            Arc::new(LocalMutex::new()),
            Duration::from_secs(60),
        ))
    }

    fn linux() -> Filter {
        Filter::default().with_platform("linux", "amd64")
    }

    #[tokio::test]
    async fn test_queue_delivers_in_store_order() {
        let items = vec![stage(1), stage(2), stage(3)];
        let q = queue(MockStageStore::new(vec![
            items.clone(),
            items[1..].to_vec(),
            items[2..].to_vec(),
        ]));
        let shutdown = CancellationToken::new();
        let handle = q.start(shutdown.clone());
        let token = CancellationToken::new();

        for item in &items {
            let next = tokio::time::timeout(Duration::from_secs(1), q.request(linux(), &token))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(next.id, item.id);
        }

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_cancel_withdraws_request() {
        let q = queue(MockStageStore::new(vec![]));
        let token = CancellationToken::new();

        let waiter = {
            let q = q.clone();
            let token = token.clone();
            tokio::spawn(async move { q.request(linux(), &token).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(q.waiting().await, 1);

        token.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(q.waiting().await, 0);
    }

    #[tokio::test]
    async fn test_schedule_coalesces_signals() {
        let q = queue(MockStageStore::new(vec![]));
        q.schedule(&stage(1)).await.unwrap();
        q.schedule(&stage(2)).await.unwrap();
        q.schedule(&stage(3)).await.unwrap();

        tokio::time::timeout(Duration::from_millis(10), q.ready.notified())
            .await
            .expect("queue signaled on schedule");
        assert!(
            tokio::time::timeout(Duration::from_millis(10), q.ready.notified())
                .await
                .is_err(),
            "repeated schedules coalesce into a single pass"
        );
    }

    #[tokio::test]
    async fn test_paused_queue_delivers_nothing() {
        let q = queue(MockStageStore::new(vec![vec![stage(1)]]));
        q.pause().await.unwrap();
        let token = CancellationToken::new();

        let waiter = {
            let q = q.clone();
            let token = token.clone();
            tokio::spawn(async move { q.request(linux(), &token).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        q.signal().await.unwrap();
        assert_eq!(q.waiting().await, 1);

        q.resume().await.unwrap();
        assert!(!q.is_paused().await);
        q.signal().await.unwrap();
        let delivered = waiter.await.unwrap().unwrap();
        assert_eq!(delivered.id, StageId::new(1));
    }

    #[tokio::test]
    async fn test_claimed_and_running_stages_are_skipped() {
        let mut claimed = stage(1);
        claimed.machine = "agent-1".into();
        let mut running = stage(2);
        running.status = Status::Running;
        running.name = "other".into();
        let q = queue(MockStageStore::new(vec![vec![claimed, running, stage(3)]]));
        let token = CancellationToken::new();

        let waiter = {
            let q = q.clone();
            let token = token.clone();
            tokio::spawn(async move { q.request(linux(), &token).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.signal().await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap().id, StageId::new(3));
    }

    #[tokio::test]
    async fn test_storage_error_aborts_pass() {
        let q = queue(MockStageStore::failing());
        let token = CancellationToken::new();
        let waiter = {
            let q = q.clone();
            let token = token.clone();
            tokio::spawn(async move { q.request(linux(), &token).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(q.signal().await.is_err());
        assert_eq!(q.waiting().await, 1);

        // the distributed mutex was released despite the error
        assert!(q.signal().await.is_err());
        token.cancel();
        assert!(waiter.await.unwrap().unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_stale_worker_is_dropped_and_next_served() {
        let q = queue(MockStageStore::new(vec![vec![stage(1)]]));

        // a request whose future was dropped without cancelling its token
        {
            let token = CancellationToken::new();
            let request = q.request(linux(), &token);
            let _ = tokio::time::timeout(Duration::from_millis(5), request).await;
        }
        assert_eq!(q.waiting().await, 1);

        let token = CancellationToken::new();
        let waiter = {
            let q = q.clone();
            let token = token.clone();
            tokio::spawn(async move { q.request(linux(), &token).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.signal().await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap().id, StageId::new(1));
        assert_eq!(q.metrics().snapshot().stale_workers, 1);
    }

    #[test]
    fn test_match_resource() {
        let tests = [
            ("pipeline", "docker", "pipeline", "docker", true),
            ("pipeline", "docker", "pipeline", "exec", false),
            ("pipeline", "docker", "secret", "docker", false),
            ("pipeline", "docker", "pipeline", "", true),
            ("pipeline", "", "pipeline", "docker", true),
            ("", "docker", "pipeline", "docker", true),
            ("", "", "", "", true),
            ("", "", "pipeline", "exec", false),
        ];
        for (kind_a, type_a, kind_b, type_b, want) in tests {
            assert_eq!(
                match_resource(kind_a, type_a, kind_b, type_b),
                want,
                "{kind_a}/{type_a} vs {kind_b}/{type_b}"
            );
        }
    }

    #[test]
    fn test_worker_platform_matching() {
        let mut arm = stage(1);
        arm.arch = "arm".into();
        arm.variant = "v7".into();

        assert!(!worker_matches(&linux(), &arm));
        assert!(worker_matches(&Filter::default(), &arm));
        assert!(worker_matches(
            &Filter::default().with_platform("linux", "arm").with_variant("v7"),
            &arm
        ));
        assert!(!worker_matches(
            &Filter::default().with_platform("linux", "arm").with_variant("v6"),
            &arm
        ));

        // stage without variant accepts any variant
        arm.variant.clear();
        assert!(worker_matches(
            &Filter::default().with_platform("linux", "arm").with_variant("v6"),
            &arm
        ));

        let mut windows = stage(2);
        windows.os = "windows".into();
        windows.kernel = "1809".into();
        let win_filter = Filter::default().with_platform("windows", "amd64");
        assert!(!worker_matches(&win_filter, &windows));
        assert!(worker_matches(&win_filter.with_kernel("1809"), &windows));
    }

    #[test]
    fn test_worker_label_matching() {
        let mut labeled = stage(1);
        labeled.labels.insert("gpu".into(), "true".into());

        assert!(!worker_matches(&linux(), &labeled));
        assert!(worker_matches(&linux().with_label("gpu", "true"), &labeled));
        assert!(!worker_matches(&linux().with_label("gpu", "false"), &labeled));
        assert!(!worker_matches(
            &linux().with_label("gpu", "true").with_label("zone", "eu"),
            &labeled
        ));
        assert!(!worker_matches(&linux().with_label("gpu", "true"), &stage(2)));
    }

    fn sibling(id: i64, repo: i64, name: &str, status: Status, limit: u32) -> Stage {
        Stage {
            id: StageId::new(id),
            repo_id: RepoId::new(repo),
            name: name.into(),
            status,
            limit,
            ..Default::default()
        }
    }

    #[test]
    fn test_within_limits() {
        let tests = vec![
            // no limit
            (
                sibling(1, 1, "build", Status::Pending, 0),
                vec![sibling(2, 1, "build", Status::Running, 0)],
                true,
            ),
            // a running sibling counts against the limit
            (
                sibling(2, 1, "build", Status::Pending, 1),
                vec![sibling(1, 1, "build", Status::Running, 1)],
                false,
            ),
            // a running sibling with a higher id still counts
            (
                sibling(1, 1, "build", Status::Pending, 1),
                vec![sibling(2, 1, "build", Status::Running, 1)],
                false,
            ),
            // an older pending sibling counts
            (
                sibling(2, 1, "build", Status::Pending, 1),
                vec![sibling(1, 1, "build", Status::Pending, 1)],
                false,
            ),
            // a newer pending sibling does not count
            (
                sibling(1, 1, "build", Status::Pending, 1),
                vec![sibling(2, 1, "build", Status::Pending, 1)],
                true,
            ),
            // other names and other repos do not count
            (
                sibling(3, 1, "build", Status::Pending, 1),
                vec![
                    sibling(1, 1, "test", Status::Running, 1),
                    sibling(2, 2, "build", Status::Running, 1),
                ],
                true,
            ),
            // two slots, one taken
            (
                sibling(3, 1, "build", Status::Pending, 2),
                vec![
                    sibling(1, 1, "build", Status::Running, 2),
                    sibling(4, 1, "build", Status::Pending, 2),
                ],
                true,
            ),
        ];

        for (i, (stage, mut siblings, want)) in tests.into_iter().enumerate() {
            siblings.push(stage.clone());
            assert_eq!(within_limits(&stage, &siblings), want, "case {i}");
        }
    }

    #[test]
    fn test_should_throttle() {
        let siblings = vec![
            sibling(1, 1, "a", Status::Running, 0),
            sibling(2, 1, "b", Status::Running, 0),
            sibling(3, 1, "c", Status::Pending, 0),
            sibling(4, 2, "a", Status::Pending, 0),
        ];

        // two stages ahead with a throttle of two
        assert!(should_throttle(&siblings[2], &siblings, 2));
        // no throttle configured
        assert!(!should_throttle(&siblings[2], &siblings, 0));
        // running stages are never throttled
        assert!(!should_throttle(&siblings[1], &siblings, 1));
        // room for one more
        assert!(!should_throttle(&siblings[2], &siblings, 3));
        // other repositories do not count
        assert!(!should_throttle(&siblings[3], &siblings, 1));
    }
}
