//! Time-delayed exits.
//!
//! A scheduled exit is a job keyed `auto-exit-<position_id>` in the
//! [`JobScheduler`]; its progress is mirrored on the position's auto-exit
//! fields so it survives restarts through [`AutoExitScheduler::recover`].
//! The same call, repeated by the daemon, picks up exits scheduled or moved
//! by other processes sharing the store.

use std::collections::HashMap;
use std::sync::Arc;

use algo_options_core::Clock;
use algo_options_data::{AutoExit, AutoExitStatus, PositionRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{AutoExitError, ExitError, JobError};
use crate::executor::{auto_exit_job_key, ExitExecutor};
use crate::jobs::{JobHandler, JobScheduler};
use crate::quote_cache::QuoteCache;
use crate::types::{ExitOutcome, ExitReason};

pub struct AutoExitScheduler {
    positions: PositionRepository,
    jobs: Arc<dyn JobScheduler>,
    clock: Arc<dyn Clock>,
    handler: Arc<dyn JobHandler>,
    /// Exit time, in epoch millis as stored, each position's job was last
    /// queued for.
    queued: Mutex<HashMap<i64, i64>>,
}

impl std::fmt::Debug for AutoExitScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoExitScheduler").finish_non_exhaustive()
    }
}

impl AutoExitScheduler {
    /// Creates the scheduler and registers its worker with `jobs`.
    #[must_use]
    pub fn new(
        positions: PositionRepository,
        jobs: Arc<dyn JobScheduler>,
        exits: Arc<ExitExecutor>,
        quotes: Arc<QuoteCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let handler: Arc<dyn JobHandler> = Arc::new(AutoExitJobHandler {
            positions: positions.clone(),
            exits,
            quotes,
        });
        jobs.register_handler(Arc::downgrade(&handler));
        Self {
            positions,
            jobs,
            clock,
            handler,
            queued: Mutex::new(HashMap::new()),
        }
    }

    /// Schedules the exit of an OPEN position at `exit_time`, superseding any
    /// pending one. A time in the past fires immediately.
    ///
    /// # Errors
    /// `PositionNotFound`, `NotOpen`, or a job/store failure.
    pub async fn schedule_exit(
        &self,
        position_id: i64,
        exit_time: DateTime<Utc>,
    ) -> Result<String, AutoExitError> {
        let pos = self
            .positions
            .get(position_id)
            .await?
            .ok_or(AutoExitError::PositionNotFound(position_id))?;
        if !pos.is_open() {
            return Err(AutoExitError::NotOpen(position_id));
        }

        // Recorded before enqueueing so an immediate firing finds it scheduled.
        let job_id = auto_exit_job_key(position_id);
        self.positions
            .set_auto_exit(
                position_id,
                &AutoExit {
                    enabled: true,
                    scheduled_at: Some(exit_time),
                    job_id: Some(job_id.clone()),
                    status: Some(AutoExitStatus::Scheduled),
                },
            )
            .await?;
        self.enqueue(position_id, exit_time).await?;

        info!(position_id, %exit_time, job_id = %job_id, "auto-exit scheduled");
        Ok(job_id)
    }

    /// Cancels a pending exit. Cancelling when none is pending is a no-op.
    /// Returns whether a job was pending.
    ///
    /// # Errors
    /// Returns a job or store failure.
    pub async fn cancel_exit(&self, position_id: i64) -> Result<bool, AutoExitError> {
        let existed = self.jobs.cancel(&auto_exit_job_key(position_id)).await?;
        self.queued.lock().remove(&position_id);
        let was_scheduled = self
            .positions
            .finish_auto_exit(position_id, AutoExitStatus::Cancelled)
            .await?;
        if existed || was_scheduled {
            info!(position_id, "auto-exit cancelled");
        }
        Ok(existed)
    }

    /// Enqueues every pending scheduled exit found in the store that has no
    /// job here yet, or whose stored exit time differs from the queued one.
    /// Returns how many were enqueued; repeated calls are cheap.
    ///
    /// # Errors
    /// Returns an error if the pending exits cannot be loaded.
    pub async fn recover(&self) -> Result<usize, AutoExitError> {
        let pending = self.positions.pending_auto_exits().await?;
        let mut restored = 0;
        for pos in &pending {
            if self.jobs.is_pending(&auto_exit_job_key(pos.id)).await {
                let stored = pos.auto_exit.scheduled_at.map(|t| t.timestamp_millis());
                let queued = self.queued.lock().get(&pos.id).copied();
                if stored.is_none() || stored == queued {
                    continue;
                }
                debug!(position_id = pos.id, "exit time moved in the store, requeueing");
            }
            let exit_time = pos.auto_exit.scheduled_at.unwrap_or_else(|| self.clock.now());
            match self.enqueue(pos.id, exit_time).await {
                Ok(_) => restored += 1,
                Err(e) => warn!(position_id = pos.id, error = %e, "failed to restore auto-exit"),
            }
        }
        if restored > 0 {
            info!(restored, "auto-exits restored");
        }
        Ok(restored)
    }

    /// The registered worker, kept alive for as long as the scheduler.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn JobHandler> {
        Arc::clone(&self.handler)
    }

    async fn enqueue(&self, position_id: i64, exit_time: DateTime<Utc>) -> Result<String, JobError> {
        let key = auto_exit_job_key(position_id);
        let delay = (exit_time - self.clock.now()).to_std().unwrap_or_default();
        self.jobs
            .schedule(&key, delay, json!({ "position_id": position_id }))
            .await?;
        self.queued
            .lock()
            .insert(position_id, exit_time.timestamp_millis());
        Ok(key)
    }
}

/// Job worker that squares off the position named in the payload.
struct AutoExitJobHandler {
    positions: PositionRepository,
    exits: Arc<ExitExecutor>,
    quotes: Arc<QuoteCache>,
}

impl AutoExitJobHandler {
    /// `AlreadyHandled` also means another actor holds the exit claim; its
    /// exit may still fail, so the job retries until the position is closed.
    async fn confirm_handled(&self, position_id: i64) -> Result<(), JobError> {
        let still_open = self
            .positions
            .get(position_id)
            .await
            .map_err(|e| JobError::Transient(e.to_string()))?
            .is_some_and(|p| p.is_open());
        if still_open {
            return Err(JobError::Transient(format!(
                "exit of position {position_id} claimed elsewhere"
            )));
        }
        info!(position_id, "auto-exit skipped, position closed by another exit");
        Ok(())
    }
}

#[async_trait]
impl JobHandler for AutoExitJobHandler {
    async fn handle(&self, key: &str, payload: &Value, attempt: u32) -> Result<(), JobError> {
        let position_id = payload
            .get("position_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| JobError::Permanent(format!("bad payload for {key}: {payload}")))?;

        let pos = self
            .positions
            .get(position_id)
            .await
            .map_err(|e| JobError::Transient(e.to_string()))?
            .ok_or_else(|| JobError::Permanent(format!("position {position_id} not found")))?;

        if !pos.is_open() {
            info!(position_id, status = pos.status.as_str(), "auto-exit skipped, position not open");
            return Ok(());
        }
        // Cancelled from another process.
        if pos.auto_exit.status != Some(AutoExitStatus::Scheduled) {
            info!(position_id, status = ?pos.auto_exit.status, "auto-exit skipped, no longer scheduled");
            return Ok(());
        }

        let price = self.quotes.price_for(&pos).await;
        match self.exits.close(&pos, &ExitReason::Scheduled, price).await {
            Ok(ExitOutcome::Closed { .. }) => {
                info!(position_id, attempt, "auto-exit executed");
                Ok(())
            }
            Ok(ExitOutcome::AlreadyHandled) => self.confirm_handled(position_id).await,
            Ok(ExitOutcome::NoSession) => Err(JobError::Permanent(format!(
                "no broker session for client {}",
                pos.client_id
            ))),
            Err(e @ ExitError::Broker(_)) if !e.is_transient() => {
                Err(JobError::Permanent(e.to_string()))
            }
            Err(e) => Err(JobError::Transient(e.to_string())),
        }
    }

    async fn on_failed(&self, key: &str, payload: &Value, error: &JobError) {
        let Some(position_id) = payload.get("position_id").and_then(Value::as_i64) else {
            return;
        };
        warn!(position_id, key, error = %error, "auto-exit failed");
        if let Err(e) = self
            .positions
            .finish_auto_exit(position_id, AutoExitStatus::Failed)
            .await
        {
            warn!(position_id, error = %e, "failed to record auto-exit failure");
        }
    }
}
