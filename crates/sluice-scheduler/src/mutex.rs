//! Process-local implementation of the distributed mutex.

use async_trait::async_trait;
use sluice_core::Result;
use sluice_core::ports::DistributedMutex;
use tokio::sync::Semaphore;

/// Serializes matching passes within one process. Sufficient when a single
/// replica runs the queue loop.
#[derive(Debug)]
pub struct LocalMutex {
    permits: Semaphore,
}

impl LocalMutex {
    pub fn new() -> Self {
        Self {
            permits: Semaphore::new(1),
        }
    }
}

impl Default for LocalMutex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DistributedMutex for LocalMutex {
    async fn lock(&self) -> Result<()> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| sluice_core::Error::Internal(e.to_string()))?;
        permit.forget();
        Ok(())
    }

    async fn unlock(&self) -> Result<()> {
        if self.permits.available_permits() == 0 {
            self.permits.add_permits(1);
        }
        Ok(())
    }
}
