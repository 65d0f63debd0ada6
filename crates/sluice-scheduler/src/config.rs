//! Configuration for the scheduler.

use serde::{Deserialize, Serialize};
use sluice_core::{Error, Result};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix, e.g. `SLUICE_QUEUE_INTERVAL_SECS=30`.
pub const ENV_PREFIX: &str = "SLUICE";

/// Configuration for the queue loop and the cancellation signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fallback interval between matching passes when nothing signals the queue.
    pub queue_interval_secs: u64,
    /// How long a cancelled execution id is remembered for late watchers.
    pub cancel_ttl_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_interval_secs: 60,
            cancel_ttl_secs: 300,
        }
    }
}

impl SchedulerConfig {
    /// Load from an optional file, then override from `SLUICE_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Set the fallback queue interval.
    pub fn with_queue_interval(mut self, interval: Duration) -> Self {
        self.queue_interval_secs = interval.as_secs().max(1);
        self
    }

    /// Set the cancellation TTL.
    pub fn with_cancel_ttl(mut self, ttl: Duration) -> Self {
        self.cancel_ttl_secs = ttl.as_secs();
        self
    }

    pub fn queue_interval(&self) -> Duration {
        Duration::from_secs(self.queue_interval_secs.max(1))
    }

    pub fn cancel_ttl(&self) -> Duration {
        Duration::from_secs(self.cancel_ttl_secs)
    }
}
