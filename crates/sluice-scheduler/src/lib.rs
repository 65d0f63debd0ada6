//! Execution orchestration for Sluice.
//!
//! Builds stage graphs from triggered pipelines, matches pending stages to
//! polling agents, and drives stages and steps through their lifecycle.

pub mod canceler;
pub mod config;
pub mod context;
pub mod dag;
pub mod manager;
pub mod metrics;
pub mod mutex;
pub mod queue;
pub mod scheduler;
pub mod signal;
pub mod triggerer;
pub mod triggers;

pub use canceler::Canceler;
pub use config::SchedulerConfig;
pub use context::Adapters;
pub use manager::ExecutionManager;
pub use mutex::LocalMutex;
pub use queue::Queue;
pub use scheduler::{QueueScheduler, Scheduler};
pub use triggerer::Triggerer;
