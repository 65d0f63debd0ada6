//! Sluice Core
//!
//! Domain types, port traits, and error handling for the Sluice execution
//! engine. This crate has minimal dependencies and defines the shared
//! vocabulary used by the scheduler and its adapters.

pub mod error;
pub mod events;
pub mod execution;
pub mod filter;
pub mod hook;
pub mod ids;
pub mod pipeline;
pub mod ports;
pub mod status;

pub use error::{Error, Result};
pub use execution::{Execution, LogLine, Stage, Step};
pub use filter::Filter;
pub use ids::*;
pub use status::Status;
