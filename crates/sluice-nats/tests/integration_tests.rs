//! Integration tests for sluice-nats.
//!
//! Run with: `cargo test -p sluice-nats --features integration` (requires docker).

#![cfg(feature = "integration")]

use futures::StreamExt;
use sluice_core::events::Event;
use sluice_core::ports::EventBus;
use sluice_core::{Execution, ExecutionId, RepoId, Status};
use sluice_nats::{NatsConfig, NatsEventBus};
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::nats::Nats;

async fn start_nats() -> (ContainerAsync<Nats>, String) {
    let container = Nats::default()
        .with_tag("2.10-alpine")
        .with_cmd(["-js"])
        .start()
        .await
        .expect("start nats");
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(4222).await.unwrap();
    (container, format!("nats://{}:{}", host, port))
}

fn execution(repo: i64, id: i64) -> Execution {
    Execution {
        id: ExecutionId::new(id),
        repo_id: RepoId::new(repo),
        status: Status::Running,
        created: chrono::Utc::now(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_publish_updates_metrics() {
    let (_container, url) = start_nats().await;
    let bus = NatsEventBus::connect(&url).await.expect("connect");

    bus.publish(Event::running(execution(1, 1)))
        .await
        .expect("publish");

    let snapshot = bus.metrics().snapshot();
    assert_eq!(snapshot.messages_published, 1);
    assert!(snapshot.bytes_published > 0);

    let info = bus.stream_info().await.expect("stream info");
    assert_eq!(info.name, "SLUICE_EVENTS");
    assert_eq!(info.messages, 1);
}

#[tokio::test]
async fn test_subscription_is_scoped_to_repository() {
    let (_container, url) = start_nats().await;
    let bus = NatsEventBus::connect_with_config(NatsConfig::new(&url).with_stream_name("SCOPED"))
        .await
        .expect("connect");

    let mut events = bus.subscribe(RepoId::new(7)).await.expect("subscribe");

    bus.publish(Event::updated(execution(8, 1))).await.unwrap();
    bus.publish(Event::completed(execution(7, 2))).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(10), events.next())
        .await
        .expect("event within timeout")
        .expect("stream open")
        .expect("decoded event");

    assert_eq!(received.scope(), RepoId::new(7));
    assert_eq!(received.payload().execution.id, ExecutionId::new(2));
    assert_eq!(received.event_type(), "execution_completed");
}

#[tokio::test]
async fn test_shutdown_drains_connection() {
    let (_container, url) = start_nats().await;
    let bus = NatsEventBus::connect(&url).await.expect("connect");
    assert!(bus.is_connected());

    bus.shutdown().await.expect("shutdown");
}
