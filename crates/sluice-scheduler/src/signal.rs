//! In-process cancellation signal for running executions.
//!
//! Agents watching an execution block in [`CancelSignal::cancelled`] and are
//! woken by [`CancelSignal::cancel`]. Cancelled ids are remembered for a TTL
//! so that a watcher that reconnects late still observes the cancel.

use sluice_core::ids::ExecutionId;
use sluice_core::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

pub struct CancelSignal {
    cancelled: Mutex<HashMap<ExecutionId, Instant>>,
    notify: broadcast::Sender<ExecutionId>,
    ttl: Duration,
}

impl CancelSignal {
    pub fn new(ttl: Duration) -> Self {
        let (notify, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            cancelled: Mutex::new(HashMap::new()),
            notify,
            ttl,
        }
    }

    /// Record the cancel and wake every watcher of `id`.
    pub async fn cancel(&self, id: ExecutionId) -> Result<()> {
        let mut cancelled = self.cancelled.lock().await;
        let now = Instant::now();
        cancelled.retain(|_, expires| *expires > now);
        cancelled.insert(id, now + self.ttl);
        drop(cancelled);

        if self.notify.send(id).is_err() {
            debug!(execution.id = %id, "no watchers subscribed to cancel signal");
        }
        Ok(())
    }

    /// Block until `id` is cancelled. Returns `Error::Cancelled` if the
    /// caller's token fires first.
    pub async fn cancelled(&self, id: ExecutionId, token: &CancellationToken) -> Result<bool> {
        // Subscribe before the lookup so a concurrent cancel cannot slip between them.
        let mut rx = self.notify.subscribe();
        if self.is_cancelled(id).await {
            return Ok(true);
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => return Err(Error::Cancelled),
                msg = rx.recv() => match msg {
                    Ok(cancelled) if cancelled == id => return Ok(true),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(_)) => {
                        if self.is_cancelled(id).await {
                            return Ok(true);
                        }
                    }
                    Err(RecvError::Closed) => {
                        return Err(Error::Internal("cancel signal closed".to_string()));
                    }
                },
            }
        }
    }

    async fn is_cancelled(&self, id: ExecutionId) -> bool {
        self.cancelled
            .lock()
            .await
            .get(&id)
            .is_some_and(|expires| *expires > Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cancel_wakes_watcher() {
        let signal = Arc::new(CancelSignal::new(Duration::from_secs(60)));
        let token = CancellationToken::new();

        let watcher = {
            let signal = signal.clone();
            let token = token.clone();
            tokio::spawn(async move { signal.cancelled(ExecutionId::new(1), &token).await })
        };

        tokio::task::yield_now().await;
        signal.cancel(ExecutionId::new(2)).await.unwrap();
        signal.cancel(ExecutionId::new(1)).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .unwrap()
            .unwrap();
        assert!(result.unwrap());
    }

    #[tokio::test]
    async fn test_late_watcher_sees_recorded_cancel() {
        let signal = CancelSignal::new(Duration::from_secs(60));
        signal.cancel(ExecutionId::new(5)).await.unwrap();

        let token = CancellationToken::new();
        assert!(signal.cancelled(ExecutionId::new(5), &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_caller_cancellation_returns_error() {
        let signal = CancelSignal::new(Duration::from_secs(60));
        let token = CancellationToken::new();
        token.cancel();

        let err = signal
            .cancelled(ExecutionId::new(5), &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recorded_cancel_expires() {
        let signal = CancelSignal::new(Duration::from_secs(10));
        signal.cancel(ExecutionId::new(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!signal.is_cancelled(ExecutionId::new(5)).await);

        // Expired entries are collected on the next cancel.
        signal.cancel(ExecutionId::new(6)).await.unwrap();
        assert_eq!(signal.cancelled.lock().await.len(), 1);
    }
}
