//! End-to-end tests against PostgreSQL and NATS.
//!
//! Run with: `cargo test -p sluice-tests --test eventbus_tests --features integration`

#![cfg(feature = "integration")]

use futures::StreamExt;
use sluice_core::pipeline::Repository;
use sluice_core::{Filter, Status, Step};
use sluice_scheduler::{ExecutionManager, QueueScheduler, Scheduler, SchedulerConfig, Triggerer};
use sluice_tests::{
    DocumentFixture, HookFixture, PipelineFixture, context::TestContext, manifest,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_single_stage_execution_publishes_lifecycle() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let adapters = ctx.adapters();

    let repo = Repository {
        id: sluice_core::RepoId::new(11),
        path: "acme/widgets".into(),
        throttle: 0,
    };
    let mut pipeline = PipelineFixture::for_repo(&repo);
    ctx.db.pipelines().create(&mut pipeline).await.unwrap();

    let scheduler = Arc::new(QueueScheduler::new(
        adapters.stages.clone(),
        Arc::new(ctx.advisory_mutex()),
        &SchedulerConfig::default(),
    ));
    let shutdown = CancellationToken::new();
    let _queue = scheduler.start(shutdown.clone());
    let dyn_scheduler: Arc<dyn Scheduler> = scheduler.clone();

    let triggerer = Triggerer::new(adapters.clone(), dyn_scheduler.clone());
    let manager = ExecutionManager::new(adapters, dyn_scheduler);

    let mut events = ctx.event_bus.subscribe(repo.id).await.unwrap();

    let execution = triggerer
        .trigger(
            &repo,
            &pipeline,
            &HookFixture::push("main"),
            &manifest(vec![DocumentFixture::named("build")]),
        )
        .await
        .unwrap()
        .expect("execution created");

    let token = CancellationToken::new();
    let delivered = tokio::time::timeout(
        Duration::from_secs(10),
        manager.request(Filter::default(), &token),
    )
    .await
    .expect("delivery within timeout")
    .unwrap();
    let mut stage = manager.accept(delivered.id, "agent-1").await.unwrap();

    stage.started = Some(chrono::Utc::now());
    stage.steps = vec![Step {
        number: 1,
        name: "compile".into(),
        status: Status::Success,
        ..Default::default()
    }];
    manager.before_stage(&mut stage).await.unwrap();
    stage.status = Status::Success;
    stage.stopped = Some(chrono::Utc::now());
    manager.after_stage(&mut stage).await.unwrap();

    let mut types = Vec::new();
    while types.len() < 2 {
        let event = tokio::time::timeout(Duration::from_secs(10), events.next())
            .await
            .expect("event within timeout")
            .expect("stream open")
            .expect("decoded event");
        assert_eq!(event.payload().execution.id, execution.id);
        types.push(event.event_type());
    }
    assert_eq!(types, vec!["execution_running", "execution_completed"]);

    let stored = ctx.db.executions();
    let finished = sluice_core::ports::ExecutionStore::find(&stored, execution.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, Status::Success);

    shutdown.cancel();
}
