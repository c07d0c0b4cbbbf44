//! Per-session concurrency control.
//!
//! Add-node, checkpoint, and tool-intercept interleavings are unsafe within
//! one session, so each session funnels through a `Semaphore(1)`.  Holding
//! the returned permit serializes the operation; it releases on drop.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the session's lock, waiting behind any in-flight operation.
    pub async fn acquire(&self, session_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned().await.expect("session semaphore closed")
    }

    /// Drop bookkeeping for a finished session.
    pub fn remove(&self, session_id: &str) {
        self.locks.lock().remove(session_id);
    }

    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }
}
