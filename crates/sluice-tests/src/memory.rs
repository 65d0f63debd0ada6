//! In-memory adapters for exercising the orchestration services without
//! external services.
//!
//! The stores honour the same version contract as the PostgreSQL stores: an
//! update with a stale version fails with `Error::VersionConflict`.

use async_trait::async_trait;
use chrono::Utc;
use sluice_core::events::Event;
use sluice_core::pipeline::Pipeline;
use sluice_core::ports::{
    CheckReporter, EventBus, ExecutionReporter, ExecutionStore, LogStream, PipelineStore,
    StageStore, StepStore,
};
use sluice_core::{
    Error, Execution, ExecutionId, LogLine, PipelineId, Result, Stage, StageId, Status, Step,
    StepId,
};
use sluice_scheduler::Adapters;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Tables {
    pipelines: BTreeMap<i64, Pipeline>,
    executions: BTreeMap<i64, Execution>,
    stages: BTreeMap<i64, Stage>,
    steps: BTreeMap<i64, Step>,
}

/// Execution, stage, step, and pipeline store backed by maps.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    next_id: AtomicI64,
    conflict_next_execution_update: AtomicBool,
    fail_list_incomplete: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a pipeline and return it with its assigned id.
    pub fn insert_pipeline(&self, mut pipeline: Pipeline) -> Pipeline {
        pipeline.id = PipelineId::new(self.next_id());
        pipeline.version = 1;
        self.tables().pipelines.insert(pipeline.id.get(), pipeline.clone());
        pipeline
    }

    /// The next execution update fails with a version conflict, as if a
    /// concurrent writer got there first.
    pub fn inject_execution_conflict(&self) {
        self.conflict_next_execution_update.store(true, Ordering::SeqCst);
    }

    /// Make `list_incomplete` fail until reset.
    pub fn set_list_incomplete_failing(&self, failing: bool) {
        self.fail_list_incomplete.store(failing, Ordering::SeqCst);
    }

    /// Bump the stored version of a stage without changing anything else.
    pub fn touch_stage(&self, id: StageId) {
        if let Some(stage) = self.tables().stages.get_mut(&id.get()) {
            stage.version += 1;
        }
    }

    pub fn execution(&self, id: ExecutionId) -> Option<Execution> {
        self.tables().executions.get(&id.get()).cloned()
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.tables().executions.values().cloned().collect()
    }

    /// Stages of an execution in stage-number order, steps attached.
    pub fn stages_of(&self, id: ExecutionId) -> Vec<Stage> {
        let tables = self.tables();
        let mut stages: Vec<Stage> = tables
            .stages
            .values()
            .filter(|s| s.execution_id == id)
            .cloned()
            .collect();
        stages.sort_by_key(|s| s.number);
        for stage in &mut stages {
            stage.steps = tables
                .steps
                .values()
                .filter(|st| st.stage_id == stage.id)
                .cloned()
                .collect();
        }
        stages
    }

    pub fn stage_named(&self, id: ExecutionId, name: &str) -> Option<Stage> {
        self.stages_of(id).into_iter().find(|s| s.name == name)
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<Pipeline> {
        self.tables().pipelines.get(&id.get()).cloned()
    }

    fn insert_stage(&self, tables: &mut Tables, stage: &mut Stage) {
        stage.id = StageId::new(self.next_id());
        stage.version = 1;
        tables.stages.insert(stage.id.get(), stage.clone());
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn find(&self, id: ExecutionId) -> Result<Option<Execution>> {
        Ok(self.execution(id))
    }

    async fn create(&self, execution: &mut Execution) -> Result<()> {
        execution.id = ExecutionId::new(self.next_id());
        execution.version = 1;
        execution.created = Utc::now();
        execution.updated = execution.created;
        let mut stored = execution.clone();
        stored.stages.clear();
        self.tables().executions.insert(execution.id.get(), stored);
        Ok(())
    }

    async fn create_with_stages(&self, execution: &mut Execution, stages: &mut [Stage]) -> Result<()> {
        ExecutionStore::create(self, execution).await?;
        let mut tables = self.tables();
        for stage in stages.iter_mut() {
            stage.execution_id = execution.id;
            stage.repo_id = execution.repo_id;
            self.insert_stage(&mut tables, stage);
        }
        Ok(())
    }

    async fn update(&self, execution: &mut Execution) -> Result<()> {
        if self.conflict_next_execution_update.swap(false, Ordering::SeqCst) {
            return Err(Error::VersionConflict);
        }
        let mut tables = self.tables();
        let stored = tables
            .executions
            .get_mut(&execution.id.get())
            .ok_or_else(|| Error::ExecutionNotFound(execution.id.to_string()))?;
        if stored.version != execution.version {
            return Err(Error::VersionConflict);
        }
        execution.version += 1;
        execution.updated = Utc::now();
        *stored = execution.clone();
        stored.stages.clear();
        Ok(())
    }
}

#[async_trait]
impl StageStore for MemoryStore {
    async fn find(&self, id: StageId) -> Result<Option<Stage>> {
        Ok(self.tables().stages.get(&id.get()).cloned())
    }

    async fn create(&self, stage: &mut Stage) -> Result<()> {
        let mut tables = self.tables();
        self.insert_stage(&mut tables, stage);
        Ok(())
    }

    async fn update(&self, stage: &mut Stage) -> Result<()> {
        let mut tables = self.tables();
        let stored = tables
            .stages
            .get_mut(&stage.id.get())
            .ok_or_else(|| Error::StageNotFound(stage.id.to_string()))?;
        if stored.version != stage.version {
            return Err(Error::VersionConflict);
        }
        stage.version += 1;
        stage.updated = Utc::now();
        *stored = stage.clone();
        stored.steps.clear();
        Ok(())
    }

    async fn list_incomplete(&self) -> Result<Vec<Stage>> {
        if self.fail_list_incomplete.load(Ordering::SeqCst) {
            return Err(Error::Database("connection refused".to_string()));
        }
        Ok(self
            .tables()
            .stages
            .values()
            .filter(|s| matches!(s.status, Status::Pending | Status::Running))
            .cloned()
            .collect())
    }

    async fn list(&self, execution_id: ExecutionId) -> Result<Vec<Stage>> {
        let mut stages = self.stages_of(execution_id);
        for stage in &mut stages {
            stage.steps.clear();
        }
        Ok(stages)
    }

    async fn list_with_steps(&self, execution_id: ExecutionId) -> Result<Vec<Stage>> {
        Ok(self.stages_of(execution_id))
    }
}

#[async_trait]
impl StepStore for MemoryStore {
    async fn find(&self, id: StepId) -> Result<Option<Step>> {
        Ok(self.tables().steps.get(&id.get()).cloned())
    }

    async fn create(&self, step: &mut Step) -> Result<()> {
        step.id = StepId::new(self.next_id());
        step.version = 1;
        self.tables().steps.insert(step.id.get(), step.clone());
        Ok(())
    }

    async fn update(&self, step: &mut Step) -> Result<()> {
        let mut tables = self.tables();
        let stored = tables
            .steps
            .get_mut(&step.id.get())
            .ok_or_else(|| Error::StepNotFound(step.id.to_string()))?;
        if stored.version != step.version {
            return Err(Error::VersionConflict);
        }
        step.version += 1;
        *stored = step.clone();
        Ok(())
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn find(&self, id: PipelineId) -> Result<Option<Pipeline>> {
        Ok(self.pipeline(id))
    }

    async fn increment_seq_num(&self, pipeline: &Pipeline) -> Result<Pipeline> {
        let mut tables = self.tables();
        let stored = tables
            .pipelines
            .get_mut(&pipeline.id.get())
            .ok_or_else(|| Error::PipelineNotFound(pipeline.id.to_string()))?;
        stored.seq += 1;
        stored.version += 1;
        stored.updated = Utc::now();
        Ok(stored.clone())
    }
}

/// Event bus that keeps everything it is asked to publish.
#[derive(Default)]
pub struct RecordingEventBus {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Event types published for one execution, in order.
    pub fn types_for(&self, id: ExecutionId) -> Vec<&'static str> {
        self.events()
            .iter()
            .filter(|e| e.payload().execution.id == id)
            .map(|e| e.event_type())
            .collect()
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
        Ok(())
    }
}

/// Live log streams keyed by step.
#[derive(Default)]
pub struct MemoryLogStream {
    streams: Mutex<HashMap<StepId, Vec<LogLine>>>,
}

impl MemoryLogStream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_open(&self, step_id: StepId) -> bool {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&step_id)
    }

    pub fn lines(&self, step_id: StepId) -> Vec<LogLine> {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&step_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl LogStream for MemoryLogStream {
    async fn create(&self, step_id: StepId) -> Result<()> {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(step_id, Vec::new());
        Ok(())
    }

    async fn write(&self, step_id: StepId, line: &LogLine) -> Result<()> {
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        let stream = streams
            .get_mut(&step_id)
            .ok_or_else(|| Error::StreamNotFound(step_id.to_string()))?;
        stream.push(line.clone());
        Ok(())
    }

    async fn delete(&self, step_id: StepId) -> Result<()> {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&step_id)
            .map(|_| ())
            .ok_or_else(|| Error::StreamNotFound(step_id.to_string()))
    }
}

/// Records status-check writes and completion reports.
#[derive(Default)]
pub struct RecordingReporter {
    checks: Mutex<Vec<(ExecutionId, Status)>>,
    executed: Mutex<Vec<ExecutionId>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn checks(&self) -> Vec<(ExecutionId, Status)> {
        self.checks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn executed(&self) -> Vec<ExecutionId> {
        self.executed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CheckReporter for RecordingReporter {
    async fn write(&self, execution: &Execution, _pipeline: &Pipeline) -> Result<()> {
        self.checks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((execution.id, execution.status));
        Ok(())
    }
}

#[async_trait]
impl ExecutionReporter for RecordingReporter {
    async fn executed(&self, execution: &Execution) -> Result<()> {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(execution.id);
        Ok(())
    }
}

/// Concrete handles behind an [`Adapters`] set, kept for assertions.
#[derive(Clone)]
pub struct MemoryAdapters {
    pub store: Arc<MemoryStore>,
    pub events: Arc<RecordingEventBus>,
    pub logs: Arc<MemoryLogStream>,
    pub reporter: Arc<RecordingReporter>,
}

impl MemoryAdapters {
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            events: RecordingEventBus::new(),
            logs: MemoryLogStream::new(),
            reporter: RecordingReporter::new(),
        }
    }

    pub fn adapters(&self) -> Adapters {
        Adapters {
            executions: self.store.clone(),
            stages: self.store.clone(),
            steps: self.store.clone(),
            pipelines: self.store.clone(),
            events: self.events.clone(),
            logs: self.logs.clone(),
            checks: self.reporter.clone(),
            reporter: self.reporter.clone(),
        }
    }
}

impl Default for MemoryAdapters {
    fn default() -> Self {
        Self::new()
    }
}
