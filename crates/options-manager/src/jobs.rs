//! Delayed job execution.
//!
//! [`JobScheduler`] is the seam to a job queue: keyed delayed jobs with a
//! separately registered worker. [`InMemoryJobScheduler`] implements it with
//! tokio timers. One job per key is pending at a time; scheduling a key again
//! supersedes the pending job. A job that has started running is never
//! aborted: cancelling or superseding it only prevents further retries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use algo_options_core::AutoExitConfig;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::JobError;

/// Worker callback invoked when a job fires.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs one attempt; `attempt` starts at 1.
    async fn handle(&self, key: &str, payload: &Value, attempt: u32) -> Result<(), JobError>;

    /// Called once when the scheduler gives up on a job.
    async fn on_failed(&self, _key: &str, _payload: &Value, _error: &JobError) {}
}

/// Keyed delayed jobs.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Schedules `payload` under `key` after `delay`, replacing any pending job
    /// with the same key.
    async fn schedule(&self, key: &str, delay: Duration, payload: Value) -> Result<(), JobError>;

    /// Cancels the job under `key`. Returns whether one existed.
    async fn cancel(&self, key: &str) -> Result<bool, JobError>;

    /// Whether a job under `key` is waiting or retrying.
    async fn is_pending(&self, key: &str) -> bool;

    /// Registers the worker. Jobs firing without a live worker are dropped.
    fn register_handler(&self, handler: Weak<dyn JobHandler>);
}

/// Retry policy for failing jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&AutoExitConfig::default())
    }
}

impl From<&AutoExitConfig> for RetryPolicy {
    fn from(c: &AutoExitConfig) -> Self {
        Self {
            max_attempts: c.max_attempts.max(1),
            initial_backoff: Duration::from_millis(c.initial_backoff_ms),
            multiplier: c.backoff_multiplier.max(1),
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt `attempt + 1`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }
}

struct JobEntry {
    generation: u64,
    running: bool,
    handle: Option<JoinHandle<()>>,
}

type JobTable = Arc<Mutex<HashMap<String, JobEntry>>>;

/// Tokio-timer backed [`JobScheduler`].
pub struct InMemoryJobScheduler {
    jobs: JobTable,
    handler: Arc<RwLock<Option<Weak<dyn JobHandler>>>>,
    retry: RetryPolicy,
    next_generation: AtomicU64,
}

impl std::fmt::Debug for InMemoryJobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryJobScheduler")
            .field("pending", &self.jobs.lock().len())
            .field("retry", &self.retry)
            .finish()
    }
}

impl InMemoryJobScheduler {
    #[must_use]
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            handler: Arc::new(RwLock::new(None)),
            retry,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Whether a job is pending or running under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.jobs.lock().contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

#[async_trait]
impl JobScheduler for InMemoryJobScheduler {
    async fn schedule(&self, key: &str, delay: Duration, payload: Value) -> Result<(), JobError> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let worker = JobWorker {
            key: key.to_string(),
            generation,
            payload,
            jobs: Arc::clone(&self.jobs),
            handler: Arc::clone(&self.handler),
            retry: self.retry,
        };

        let mut jobs = self.jobs.lock();
        if let Some(old) = jobs.remove(key) {
            debug!(key, "superseding pending job");
            if !old.running {
                if let Some(h) = old.handle {
                    h.abort();
                }
            }
        }
        let handle = tokio::spawn(worker.run(delay));
        jobs.insert(
            key.to_string(),
            JobEntry {
                generation,
                running: false,
                handle: Some(handle),
            },
        );
        Ok(())
    }

    async fn cancel(&self, key: &str) -> Result<bool, JobError> {
        let Some(entry) = self.jobs.lock().remove(key) else {
            return Ok(false);
        };
        if !entry.running {
            if let Some(h) = entry.handle {
                h.abort();
            }
        }
        debug!(key, "job cancelled");
        Ok(true)
    }

    async fn is_pending(&self, key: &str) -> bool {
        self.contains(key)
    }

    fn register_handler(&self, handler: Weak<dyn JobHandler>) {
        *self.handler.write() = Some(handler);
    }
}

struct JobWorker {
    key: String,
    generation: u64,
    payload: Value,
    jobs: JobTable,
    handler: Arc<RwLock<Option<Weak<dyn JobHandler>>>>,
    retry: RetryPolicy,
}

impl JobWorker {
    async fn run(self, delay: Duration) {
        tokio::time::sleep(delay).await;

        let mut attempt = 1;
        loop {
            if !self.set_running(true) {
                return;
            }

            let Some(handler) = self.handler.read().as_ref().and_then(Weak::upgrade) else {
                error!(key = %self.key, "job fired without a registered handler");
                self.finish();
                return;
            };

            match handler.handle(&self.key, &self.payload, attempt).await {
                Ok(()) => {
                    debug!(key = %self.key, attempt, "job completed");
                    self.finish();
                    return;
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let wait = self.retry.backoff(attempt);
                    warn!(key = %self.key, attempt, error = %e, ?wait, "job failed, retrying");
                    if !self.set_running(false) {
                        return;
                    }
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(key = %self.key, attempt, error = %e, "job failed permanently");
                    self.finish();
                    handler.on_failed(&self.key, &self.payload, &e).await;
                    return;
                }
            }
        }
    }

    /// Marks this job's entry; false when it was cancelled or superseded.
    fn set_running(&self, running: bool) -> bool {
        match self.jobs.lock().get_mut(&self.key) {
            Some(entry) if entry.generation == self.generation => {
                entry.running = running;
                true
            }
            _ => false,
        }
    }

    fn finish(&self) {
        let mut jobs = self.jobs.lock();
        if jobs.get(&self.key).is_some_and(|e| e.generation == self.generation) {
            jobs.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Value, u32)>>,
        fail_transient: AtomicU32,
        fail_permanent: std::sync::atomic::AtomicBool,
        failed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, key: &str, payload: &Value, attempt: u32) -> Result<(), JobError> {
            self.calls.lock().push((key.to_string(), payload.clone(), attempt));
            if self.fail_permanent.load(Ordering::SeqCst) {
                return Err(JobError::Permanent("gone".to_string()));
            }
            if self.fail_transient.load(Ordering::SeqCst) > 0 {
                self.fail_transient.fetch_sub(1, Ordering::SeqCst);
                return Err(JobError::Transient("timeout".to_string()));
            }
            Ok(())
        }

        async fn on_failed(&self, key: &str, _payload: &Value, _error: &JobError) {
            self.failed.lock().push(key.to_string());
        }
    }

    fn setup() -> (InMemoryJobScheduler, Arc<Recorder>) {
        let scheduler = InMemoryJobScheduler::new(RetryPolicy::default());
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn JobHandler> = recorder.clone();
        scheduler.register_handler(Arc::downgrade(&handler));
        (scheduler, recorder)
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(1), Duration::from_secs(1));
        assert_eq!(p.backoff(2), Duration::from_secs(2));
        assert_eq!(p.backoff(3), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (scheduler, recorder) = setup();
        scheduler
            .schedule("k", Duration::from_secs(10), serde_json::json!({"n": 1}))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(recorder.calls.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(recorder.calls.lock().len(), 1);
        assert!(!scheduler.contains("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_supersedes_pending_job() {
        let (scheduler, recorder) = setup();
        scheduler
            .schedule("k", Duration::from_secs(5), serde_json::json!({"v": "old"}))
            .await
            .unwrap();
        scheduler
            .schedule("k", Duration::from_secs(20), serde_json::json!({"v": "new"}))
            .await
            .unwrap();
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let calls = recorder.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, serde_json::json!({"v": "new"}));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing_and_missing_cancel_is_noop() {
        let (scheduler, recorder) = setup();
        scheduler
            .schedule("k", Duration::from_secs(5), Value::Null)
            .await
            .unwrap();

        assert!(scheduler.cancel("k").await.unwrap());
        assert!(!scheduler.cancel("k").await.unwrap());
        assert!(!scheduler.cancel("never-scheduled").await.unwrap());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(recorder.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_with_backoff() {
        let (scheduler, recorder) = setup();
        recorder.fail_transient.store(2, Ordering::SeqCst);
        scheduler.schedule("k", Duration::ZERO, Value::Null).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(recorder.calls.lock().len(), 1);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.calls.lock().len(), 2);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let attempts: Vec<u32> = recorder.calls.lock().iter().map(|c| c.2).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert!(recorder.failed.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let (scheduler, recorder) = setup();
        recorder.fail_transient.store(10, Ordering::SeqCst);
        scheduler.schedule("k", Duration::ZERO, Value::Null).await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(recorder.calls.lock().len(), 3);
        assert_eq!(*recorder.failed.lock(), vec!["k".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let (scheduler, recorder) = setup();
        recorder.fail_permanent.store(true, Ordering::SeqCst);
        scheduler.schedule("k", Duration::ZERO, Value::Null).await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(recorder.calls.lock().len(), 1);
        assert_eq!(recorder.failed.lock().len(), 1);
    }
}
