//! NATS JetStream event bus for Sluice execution events.

mod bus;
pub mod config;
pub mod metrics;

pub use bus::{EventStream, NatsEventBus, StreamInfo};
pub use config::NatsConfig;
pub use metrics::{MetricsSnapshot, NatsMetrics};
