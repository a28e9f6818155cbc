//! Per-key mutual exclusion for cache fills.
//!
//! Only one holder per key at a time; distinct keys never contend. Waiters are
//! woken together when a key is released and race for it again, so there is no
//! ordering among them. The guard clears the key on drop, which covers errors,
//! panics and request futures dropped after a client disconnect.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct KeyedSemaphore {
    held: RwLock<HashSet<String>>,
    released: Notify,
}

impl KeyedSemaphore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait until `key` is free, then take it.
    pub async fn acquire(self: &Arc<Self>, key: &str) -> SemaphoreGuard {
        loop {
            // Register for the wakeup before checking, otherwise a release
            // landing between the check and the await would be missed.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(guard) = self.try_acquire(key) {
                return guard;
            }

            tracing::debug!(key = %key, "Waiting for in-flight fetch to finish");
            notified.await;
        }
    }

    /// Take `key` if nobody holds it.
    pub fn try_acquire(self: &Arc<Self>, key: &str) -> Option<SemaphoreGuard> {
        let inserted = self
            .held
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());

        inserted.then(|| SemaphoreGuard {
            semaphore: Arc::clone(self),
            key: key.to_string(),
        })
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    /// Clear `key` unconditionally and wake every waiter.
    pub fn release(&self, key: &str) {
        self.held
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        self.released.notify_waiters();
    }

    pub fn in_flight(&self) -> usize {
        self.held.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Scoped hold on one key of a [`KeyedSemaphore`].
#[derive(Debug)]
pub struct SemaphoreGuard {
    semaphore: Arc<KeyedSemaphore>,
    key: String,
}

impl SemaphoreGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for SemaphoreGuard {
    fn drop(&mut self) {
        self.semaphore.release(&self.key);
    }
}
