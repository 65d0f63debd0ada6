//! Store implementations for PostgreSQL.

mod execution;
mod pipeline;
mod stage;
mod step;

pub use execution::PgExecutionStore;
pub use pipeline::PgPipelineStore;
pub use stage::PgStageStore;
pub use step::PgStepStore;

use sluice_core::Error;

pub(crate) fn db_err(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

/// Map the outcome of a `WHERE version = $n` update.
pub(crate) fn check_version(rows_affected: u64) -> sluice_core::Result<()> {
    if rows_affected == 0 {
        Err(Error::VersionConflict)
    } else {
        Ok(())
    }
}
