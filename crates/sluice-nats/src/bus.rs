//! JetStream-backed publisher for execution events.

use async_nats::jetstream::{
    self, consumer::AckPolicy, consumer::DeliverPolicy, consumer::pull::Config as ConsumerConfig,
    stream::Config as StreamConfig,
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use sluice_core::events::Event;
use sluice_core::ports::EventBus;
use sluice_core::{Error, RepoId, Result};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::NatsConfig;
use crate::metrics::NatsMetrics;

/// Events decoded from a subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// Event bus publishing every execution event to a JetStream stream. Subjects
/// are `execution.<verb>.<repo>.<execution>`, so subscribers scope by repository.
#[derive(Clone)]
pub struct NatsEventBus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
    metrics: Arc<NatsMetrics>,
}

impl NatsEventBus {
    /// Connect to a single server with default settings.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(NatsConfig::new(url)).await
    }

    /// Connect with custom configuration and make sure the stream exists.
    pub async fn connect_with_config(config: NatsConfig) -> Result<Self> {
        let urls = config.urls.join(",");
        info!("Connecting to NATS at {}", urls);

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(config.connection_timeout)
            .request_timeout(Some(config.request_timeout))
            .connect(&urls)
            .await
            .map_err(|e| Error::EventBus(format!("Failed to connect to NATS: {}", e)))?;

        let jetstream = jetstream::new(client.clone());

        let stream_config = StreamConfig {
            name: config.stream_name.clone(),
            subjects: config.subjects.clone(),
            retention: jetstream::stream::RetentionPolicy::Limits,
            max_age: config.max_age,
            storage: jetstream::stream::StorageType::File,
            ..Default::default()
        };

        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| Error::EventBus(format!("Failed to create stream: {}", e)))?;

        info!(stream = %config.stream_name, "Connected to NATS and initialized JetStream");

        Ok(Self {
            client,
            jetstream,
            config,
            metrics: NatsMetrics::new(),
        })
    }

    pub fn metrics(&self) -> &Arc<NatsMetrics> {
        &self.metrics
    }

    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    /// Subscribe to new events of one repository.
    pub async fn subscribe(&self, repo_id: RepoId) -> Result<EventStream> {
        let pattern = format!("execution.*.{}.*", repo_id.get());
        debug!("Subscribing to pattern: {}", pattern);

        let consumer = self
            .jetstream
            .create_consumer_on_stream(
                ConsumerConfig {
                    filter_subject: pattern,
                    deliver_policy: DeliverPolicy::New,
                    ack_policy: AckPolicy::None,
                    ..Default::default()
                },
                &self.config.stream_name,
            )
            .await
            .map_err(|e| Error::EventBus(format!("Failed to create consumer: {}", e)))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::EventBus(format!("Failed to get messages: {}", e)))?;

        let metrics = self.metrics.clone();
        let stream = messages.map(move |msg_result| {
            let msg = msg_result.map_err(|e| Error::EventBus(format!("Message error: {}", e)))?;
            metrics.record_receive();
            serde_json::from_slice::<Event>(&msg.payload).map_err(|e| {
                metrics.record_decode_failure();
                Error::Serialization(e.to_string())
            })
        });

        Ok(Box::pin(stream))
    }

    pub async fn stream_info(&self) -> Result<StreamInfo> {
        let mut stream = self
            .jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| Error::EventBus(format!("Failed to get stream: {}", e)))?;

        let info = stream
            .info()
            .await
            .map_err(|e| Error::EventBus(format!("Failed to get stream info: {}", e)))?;

        Ok(StreamInfo {
            name: info.config.name.clone(),
            messages: info.state.messages,
            last_seq: info.state.last_sequence,
        })
    }

    /// Flush pending publishes and close the connection.
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.client.drain().await {
            warn!("Error draining NATS connection: {}", e);
        }
        Ok(())
    }
}

/// Information about the JetStream stream.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub name: String,
    pub messages: u64,
    pub last_seq: u64,
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        let subject = event.subject();
        let payload = serde_json::to_vec(&event)?;
        let payload_len = payload.len() as u64;
        debug!("Publishing event to {}", subject);

        let ack = match self.jetstream.publish(subject.clone(), payload.into()).await {
            Ok(ack) => ack,
            Err(e) => {
                self.metrics.record_publish_failure();
                return Err(Error::EventBus(format!(
                    "Failed to publish to {}: {}",
                    subject, e
                )));
            }
        };

        if let Err(e) = ack.await {
            self.metrics.record_publish_failure();
            return Err(Error::EventBus(format!("Failed to confirm publish: {}", e)));
        }

        self.metrics.record_publish(payload_len);
        Ok(())
    }
}
