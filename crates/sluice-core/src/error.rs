//! Error types for Sluice.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Optimistic concurrency
    #[error("Version conflict: the row was modified by another writer")]
    VersionConflict,

    // Lookup errors
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Stage not found: {0}")]
    StageNotFound(String),

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    // Lifecycle errors
    #[error("Stage already assigned to machine {machine}")]
    StageAlreadyAssigned { machine: String },

    #[error("Log stream not found for step {0}")]
    StreamNotFound(String),

    #[error("Operation cancelled by caller")]
    Cancelled,

    #[error("Invalid pipeline definition: {0}")]
    InvalidPipeline(String),

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when a conditional write lost against a concurrent writer.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Error::VersionConflict)
    }

    /// True when the operation was abandoned because its caller went away.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
