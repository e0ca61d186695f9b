//! Supervised background tasks keyed by job/payment id.
//!
//! Submission logic must spawn at most one poller per accepted job or
//! initiated payment; the registry refuses duplicate keys and lets
//! shutdown abort whatever is still in flight.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `fut` under `key` unless a live task with the same key
    /// already exists. Returns whether the task was spawned.
    pub fn spawn_unique<F>(&self, key: &str, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, handle| !handle.is_finished());

        if tasks.contains_key(key) {
            warn!(key, "duplicate background task refused");
            return false;
        }

        debug!(key, "spawning background task");
        tasks.insert(key.to_string(), tokio::spawn(fut));
        true
    }

    /// Number of tracked tasks that have not finished yet.
    pub fn active_count(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, handle| !handle.is_finished());
        tasks.len()
    }

    /// Abort every tracked task. Used at shutdown; orphaned pollers
    /// must not outlive the engine.
    pub fn abort_all(&self) {
        let mut tasks = self.tasks.lock();
        for (key, handle) in tasks.drain() {
            if !handle.is_finished() {
                debug!(key, "aborting background task");
                handle.abort();
            }
        }
    }

    /// Wait for a specific task to finish. Test helper; the engine
    /// itself never joins pollers.
    pub async fn join(&self, key: &str) {
        let handle = self.tasks.lock().remove(key);
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
