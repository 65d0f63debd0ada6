//! Stage delivery through the queue: limits, throttling, claiming, and pausing.

use sluice_core::{Error, Filter, Stage, Status};
use sluice_scheduler::{Scheduler, SchedulerConfig};
use sluice_tests::{DocumentFixture, Engine, RepoFixture, assert_completes_within, manifest};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SHORT: Duration = Duration::from_millis(200);

#[tokio::test]
async fn test_concurrency_limit_holds_back_later_executions() {
    let engine = Engine::start();
    let mut build = DocumentFixture::named("build");
    build.concurrency.limit = 1;
    let docs = manifest(vec![build]);

    let first = engine.trigger(&docs).await.unwrap().unwrap();
    let second = engine.trigger(&docs).await.unwrap().unwrap();

    let mut stage = engine.claim("agent-1").await.unwrap();
    assert_eq!(stage.execution_id, first.id);

    let err = engine.poll(Filter::default(), SHORT).await.unwrap_err();
    assert!(err.is_cancelled());

    engine.run_stage(&mut stage, Status::Success).await.unwrap();

    let next = engine.claim("agent-2").await.unwrap();
    assert_eq!(next.execution_id, second.id);
}

#[tokio::test]
async fn test_repository_throttle_holds_back_stages() {
    let engine = Engine::start_with(RepoFixture::throttled(1), SchedulerConfig::default());
    let docs = vec![DocumentFixture::named("lint"), DocumentFixture::named("unit")];
    engine.trigger(&manifest(docs)).await.unwrap().unwrap();

    let mut lint = engine.claim("agent-1").await.unwrap();
    assert_eq!(lint.name, "lint");
    assert!(engine.poll(Filter::default(), SHORT).await.unwrap_err().is_cancelled());

    engine.run_stage(&mut lint, Status::Success).await.unwrap();
    assert_eq!(engine.claim("agent-2").await.unwrap().name, "unit");
}

#[tokio::test]
async fn test_stage_is_accepted_once() {
    let engine = Engine::start();
    engine
        .trigger(&manifest(vec![DocumentFixture::named("build")]))
        .await
        .unwrap();

    let stage = engine
        .poll(Filter::default(), Duration::from_secs(5))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        engine.manager.accept(stage.id, "agent-1"),
        engine.manager.accept(stage.id, "agent-2"),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

    let err = results.into_iter().find_map(|r| r.err()).unwrap();
    assert!(
        matches!(err, Error::StageAlreadyAssigned { .. }) || err.is_version_conflict(),
        "unexpected error: {err}"
    );

    let stored = engine.memory.store.stage_named(stage.execution_id, "build").unwrap();
    assert_eq!(stored.status, Status::Running);
    assert!(!stored.machine.is_empty());
}

#[tokio::test]
async fn test_filter_routes_by_platform() {
    let engine = Engine::start();
    let mut arm = DocumentFixture::named("arm");
    arm.platform.os = "linux".into();
    arm.platform.arch = "arm64".into();
    engine.trigger(&manifest(vec![arm])).await.unwrap();

    let amd = Filter::default().with_platform("linux", "amd64");
    assert!(engine.poll(amd, SHORT).await.unwrap_err().is_cancelled());

    let arm = Filter::default().with_platform("linux", "arm64");
    let stage = engine.poll(arm, Duration::from_secs(5)).await.unwrap();
    assert_eq!(stage.arch, "arm64");
}

#[tokio::test]
async fn test_paused_queue_delivers_after_resume() {
    let engine = Engine::start();
    engine.scheduler.pause().await.unwrap();
    engine
        .trigger(&manifest(vec![DocumentFixture::named("build")]))
        .await
        .unwrap();

    assert!(engine.poll(Filter::default(), SHORT).await.unwrap_err().is_cancelled());

    let waiting = engine.poll(Filter::default(), Duration::from_secs(5));
    let resume = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.scheduler.resume().await
    };
    let (stage, resumed) =
        assert_completes_within(async { tokio::join!(waiting, resume) }, Duration::from_secs(5)).await;
    resumed.unwrap();
    assert_eq!(stage.unwrap().name, "build");
}

#[tokio::test]
async fn test_cancelled_poll_withdraws_registration() {
    let engine = Engine::start();
    assert!(engine.poll(Filter::default(), SHORT).await.unwrap_err().is_cancelled());
    assert_eq!(engine.scheduler.queue().waiting().await, 0);

    // a later stage goes to a live poll, not the withdrawn one
    engine
        .trigger(&manifest(vec![DocumentFixture::named("build")]))
        .await
        .unwrap();
    let stage = engine.poll(Filter::default(), Duration::from_secs(5)).await.unwrap();
    assert_eq!(stage.name, "build");
}

/// Counts `name` stages currently running across every execution.
fn running_named(engine: &Engine, name: &str) -> usize {
    let store = &engine.memory.store;
    store
        .executions()
        .iter()
        .filter_map(|e| store.stage_named(e.id, name))
        .filter(|s| s.status == Status::Running)
        .count()
}

/// Poll and accept until a poll comes back empty. A stage handed to two
/// agents is won by one of them; the other polls again.
async fn claim_until_idle(engine: &Engine, machine: &str) -> sluice_core::Result<Stage> {
    loop {
        let stage = engine.poll(Filter::default(), Duration::from_millis(400)).await?;
        match engine.manager.accept(stage.id, machine).await {
            Err(e) if e.is_version_conflict() || matches!(e, Error::StageAlreadyAssigned { .. }) => {
                continue;
            }
            other => return other,
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_accepts_respect_the_limit() {
    const LIMIT: u32 = 2;
    const EXTRA: usize = 3;
    const AGENTS: usize = 5;

    let engine = Arc::new(Engine::start());
    let mut build = DocumentFixture::named("build");
    build.concurrency.limit = LIMIT;
    let docs = manifest(vec![build]);
    for _ in 0..LIMIT as usize + EXTRA {
        engine.trigger(&docs).await.unwrap().unwrap();
    }

    let done = CancellationToken::new();
    let sampler = {
        let engine = engine.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let mut peak = 0;
            while !done.is_cancelled() {
                peak = peak.max(running_named(&engine, "build"));
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            peak.max(running_named(&engine, "build"))
        })
    };

    let agents: Vec<_> = (0..AGENTS)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move { claim_until_idle(&engine, &format!("agent-{i}")).await })
        })
        .collect();

    let mut accepted = 0;
    for agent in agents {
        match agent.await.unwrap() {
            Ok(stage) => {
                assert_eq!(stage.status, Status::Running);
                accepted += 1;
            }
            Err(e) => assert!(e.is_cancelled(), "unexpected error: {e}"),
        }
    }
    done.cancel();
    let peak = sampler.await.unwrap();

    assert_eq!(accepted, LIMIT as usize);
    assert_eq!(running_named(&engine, "build"), LIMIT as usize);
    assert!(peak <= LIMIT as usize, "{peak} build stages ran at once");
}
