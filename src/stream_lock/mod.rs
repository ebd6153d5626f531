//! StreamLock - Exclusive Camera Access
//!
//! ## Responsibilities
//!
//! - At most one camera-reading loop process-wide
//! - Bounded wait for the slot, independent of per-client bookkeeping
//! - Release exactly once via lease Drop on every exit path

use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

/// Default bounded wait (5 seconds)
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5000;

/// Process-wide binary lock guarding the upstream camera connection.
pub struct StreamLock {
    slot: Arc<Mutex<()>>,
    wait_timeout: Duration,
}

impl StreamLock {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(())),
            wait_timeout: Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(wait_timeout: Duration) -> Self {
        Self {
            slot: Arc::new(Mutex::new(())),
            wait_timeout,
        }
    }

    /// Acquire the camera slot, waiting up to the configured bound.
    ///
    /// On timeout the caller gets `Error::Busy` and owns nothing: no
    /// teardown may run for a lock that was never acquired. The returned
    /// lease releases the slot when dropped.
    pub async fn acquire(&self) -> Result<StreamLease> {
        match timeout(self.wait_timeout, self.slot.clone().lock_owned()).await {
            Ok(guard) => {
                tracing::debug!("Stream lock acquired");
                Ok(StreamLease { _guard: guard })
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.wait_timeout.as_millis(),
                    "Stream lock timeout - camera busy"
                );
                Err(Error::Busy("camera is in use by another stream".into()))
            }
        }
    }

    /// Whether the slot is currently held.
    pub fn is_held(&self) -> bool {
        match self.slot.try_lock() {
            Ok(_guard) => false,
            Err(_) => true,
        }
    }
}

impl Default for StreamLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Camera slot lease - released on Drop
pub struct StreamLease {
    _guard: OwnedMutexGuard<()>,
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        tracing::debug!("Stream lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_release() {
        let lock = StreamLock::new();

        let lease = lock.acquire().await.unwrap();
        assert!(lock.is_held());

        drop(lease);
        assert!(!lock.is_held());

        let _lease2 = lock.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_returns_busy() {
        let lock = StreamLock::with_timeout(Duration::from_millis(100));

        let _lease = lock.acquire().await.unwrap();

        let result = lock.acquire().await;
        assert!(matches!(result, Err(Error::Busy(_))));
    }

    #[tokio::test]
    async fn test_waiter_proceeds_after_release() {
        let lock = Arc::new(StreamLock::with_timeout(Duration::from_millis(500)));

        let lease = lock.acquire().await.unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire().await.is_ok() })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(lease);

        assert!(waiter.await.unwrap());
    }
}
