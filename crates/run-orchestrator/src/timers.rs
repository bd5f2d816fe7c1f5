//! Process-local registry of run timers.
//!
//! Each running run has at most one timer task. The registry only holds the
//! shutdown side of each timer; detaching signals the task, which exits at
//! its next await point. A timer that is mid-tick finishes that tick first.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct RunTimers {
    timers: Arc<RwLock<HashMap<i64, watch::Sender<bool>>>>,
}

impl RunTimers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a timer for `run_id` and returns its shutdown receiver, or
    /// `None` when one is already attached.
    pub async fn attach(&self, run_id: i64) -> Option<watch::Receiver<bool>> {
        let mut timers = self.timers.write().await;
        if timers.contains_key(&run_id) {
            return None;
        }
        let (tx, rx) = watch::channel(false);
        timers.insert(run_id, tx);
        debug!(run_id, "run timer attached");
        Some(rx)
    }

    /// Signals and forgets the timer of `run_id`. Returns whether one existed.
    pub async fn detach(&self, run_id: i64) -> bool {
        let Some(tx) = self.timers.write().await.remove(&run_id) else {
            return false;
        };
        // The task may already be gone.
        let _ = tx.send(true);
        debug!(run_id, "run timer detached");
        true
    }

    /// Signals every timer.
    pub async fn detach_all(&self) -> usize {
        let drained: Vec<_> = self.timers.write().await.drain().collect();
        for (_, tx) in &drained {
            let _ = tx.send(true);
        }
        drained.len()
    }

    pub async fn is_attached(&self, run_id: i64) -> bool {
        self.timers.read().await.contains_key(&run_id)
    }

    pub async fn len(&self) -> usize {
        self.timers.read().await.len()
    }
}
