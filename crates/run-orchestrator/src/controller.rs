//! Strategy run lifecycle.
//!
//! A run is `running` from [`RunController::start`] until it is stopped at
//! end of day, on max loss, on the daily trade limit, or by hand. While it
//! runs, a timer task ticks it every interval: each tick re-reads the run,
//! checks the cutoff, asks the [`RiskEnforcer`] for a verdict and places
//! the next batch. Only one run may be `running`; the store enforces it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use algo_options_core::{BrokerGateway, Clock, RunConfig, StrategyResolver, UserDirectory};
use algo_options_data::{AlgoRun, NewRun, Repositories, StopReason};
use algo_options_manager::{ExitExecutor, ExitReason, QuoteCache, RiskEnforcer, RiskVerdict};
use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::calendar::MarketCalendar;
use crate::error::RunError;
use crate::placement::BatchOutcome;
use crate::timers::RunTimers;

/// Settings resolved once at construction.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub run: RunConfig,
    pub calendar: MarketCalendar,
    /// Product type stamped on entry orders.
    pub product_type: Option<String>,
}

impl ControllerSettings {
    /// # Errors
    /// Returns an error for an invalid time zone or cutoff.
    pub fn from_config(run: &RunConfig, product_type: Option<String>) -> Result<Self> {
        Ok(Self {
            calendar: MarketCalendar::from_config(run)?,
            run: run.clone(),
            product_type,
        })
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.run.interval().max(Duration::from_secs(1))
    }
}

/// Collaborators a controller drives.
#[derive(Clone)]
pub struct RunServices {
    pub repos: Repositories,
    pub broker: Arc<dyn BrokerGateway>,
    pub strategies: Arc<dyn StrategyResolver>,
    pub users: Arc<dyn UserDirectory>,
    pub quotes: Arc<QuoteCache>,
    pub exits: Arc<ExitExecutor>,
    pub risk: Arc<RiskEnforcer>,
    pub clock: Arc<dyn Clock>,
}

/// What a single tick decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stopped(StopReason),
    /// The run was already stopped or is gone.
    NotRunning,
}

/// Result of [`RunController::stop`].
#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub run: AlgoRun,
    /// Whether this call performed the running → stopped transition.
    pub stopped_now: bool,
    pub closed: usize,
    pub failed: usize,
}

/// Snapshot for the status command.
#[derive(Debug, Clone, Serialize)]
pub struct RunOverview {
    pub run: AlgoRun,
    pub timer_attached: bool,
    pub batches_today: u32,
    pub open_positions: usize,
}

pub struct RunController {
    me: Weak<Self>,
    pub(crate) repos: Repositories,
    pub(crate) broker: Arc<dyn BrokerGateway>,
    pub(crate) strategies: Arc<dyn StrategyResolver>,
    pub(crate) users: Arc<dyn UserDirectory>,
    pub(crate) quotes: Arc<QuoteCache>,
    exits: Arc<ExitExecutor>,
    risk: Arc<RiskEnforcer>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: ControllerSettings,
    timers: RunTimers,
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("settings", &self.settings)
            .field("timers", &self.timers)
            .finish_non_exhaustive()
    }
}

impl RunController {
    #[must_use]
    pub fn new(services: RunServices, settings: ControllerSettings) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            repos: services.repos,
            broker: services.broker,
            strategies: services.strategies,
            users: services.users,
            quotes: services.quotes,
            exits: services.exits,
            risk: services.risk,
            clock: services.clock,
            settings,
            timers: RunTimers::new(),
        })
    }

    /// Starts a run, places its first batch and attaches its timer.
    ///
    /// # Errors
    /// `PastCutoff` at or after the end-of-day cutoff; `AlreadyRunning` if a
    /// run is already running; `Store` on store failure.
    pub async fn start(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        strategy: &str,
        created_by: &str,
    ) -> Result<AlgoRun, RunError> {
        if self.settings.calendar.is_past_cutoff(self.clock.now()) {
            let cutoff = self.settings.run.eod_cutoff.clone();
            warn!(symbol, strategy, %cutoff, "start refused after end-of-day cutoff");
            return Err(RunError::PastCutoff(cutoff));
        }

        let new = NewRun {
            symbol: symbol.to_uppercase(),
            expiry,
            strategy: strategy.to_string(),
            created_by: created_by.to_string(),
            risk: self.settings.run.risk_for(strategy),
        };

        let Some(run) = self
            .repos
            .runs
            .try_insert_running(&new, self.clock.now())
            .await?
        else {
            warn!(symbol = %new.symbol, strategy, "start refused, a run is already running");
            return Err(RunError::AlreadyRunning);
        };

        info!(
            run_id = run.id,
            symbol = %run.symbol,
            expiry = %run.expiry,
            strategy = %run.strategy,
            created_by = %run.created_by,
            max_trades_per_day = run.risk.max_trades_per_day,
            max_loss_percent = %run.risk.max_loss_percent,
            "run started"
        );

        match self.place_trades(&run).await {
            Ok(BatchOutcome::LimitReached { .. }) => {
                let report = self.stop(run.id, StopReason::MaxTradesReached).await?;
                return Ok(report.run);
            }
            Ok(outcome) => debug!(run_id = run.id, ?outcome, "first batch done"),
            Err(e) => error!(run_id = run.id, error = %e, "first batch failed"),
        }

        self.attach_timer(run.id).await;
        Ok(run)
    }

    /// Stops a run and squares off its open positions.
    ///
    /// Stopping an already stopped run keeps its first stop reason and only
    /// retries the square-off of positions still open.
    ///
    /// # Errors
    /// `NotFound` for an unknown run; `Store` on store failure.
    pub async fn stop(&self, run_id: i64, reason: StopReason) -> Result<StopReport, RunError> {
        if self.repos.runs.get(run_id).await?.is_none() {
            return Err(RunError::NotFound(run_id));
        }

        let stopped_now = self
            .repos
            .runs
            .mark_stopped(run_id, &reason, self.clock.now())
            .await?;
        self.timers.detach(run_id).await;

        let run = self
            .repos
            .runs
            .get(run_id)
            .await?
            .ok_or(RunError::NotFound(run_id))?;
        let recorded = run
            .stop_reason
            .clone()
            .unwrap_or_else(|| reason.to_string());

        if stopped_now {
            info!(run_id, reason = %recorded, "run stopped");
        } else {
            debug!(run_id, reason = %recorded, "run already stopped");
        }

        let exit_reason = ExitReason::RunStopped(recorded);
        let mut closed = 0;
        let mut failed = 0;
        for pos in self.repos.positions.open_positions_for_run(run_id).await? {
            let price = self.quotes.price_for(&pos).await;
            match self.exits.close(&pos, &exit_reason, price).await {
                Ok(outcome) if outcome.is_closed() => closed += 1,
                Ok(outcome) => debug!(position_id = pos.id, ?outcome, "square-off skipped"),
                Err(e) => {
                    error!(position_id = pos.id, error = %e, "square-off failed");
                    failed += 1;
                }
            }
        }
        if closed + failed > 0 {
            info!(run_id, closed, failed, "run positions squared off");
        }

        Ok(StopReport {
            run,
            stopped_now,
            closed,
            failed,
        })
    }

    /// One timer tick for `run_id`.
    pub async fn tick(&self, run_id: i64) -> TickOutcome {
        let run = match self.repos.runs.get(run_id).await {
            Ok(Some(run)) if run.is_running() => run,
            Ok(_) => return TickOutcome::NotRunning,
            Err(e) => {
                error!(run_id, error = %e, "failed to load run");
                return TickOutcome::Continue;
            }
        };

        if self.settings.calendar.is_past_cutoff(self.clock.now()) {
            info!(run_id, cutoff = %self.settings.run.eod_cutoff, "end of day reached");
            return self.stop_from_tick(run_id, StopReason::Eod).await;
        }

        match self.risk.evaluate(&run).await {
            Ok(RiskVerdict::StopRun(snapshot)) => {
                warn!(
                    run_id,
                    loss_percent = %snapshot.loss_percent.round_dp(4),
                    "stopping run on max loss"
                );
                return self.stop_from_tick(run_id, StopReason::MaxLossHit).await;
            }
            Ok(RiskVerdict::Deferred) => return TickOutcome::Continue,
            Ok(RiskVerdict::Continue(_)) => {}
            Err(e) => {
                error!(run_id, error = %e, "risk evaluation failed, batch skipped");
                return TickOutcome::Continue;
            }
        }

        match self.place_trades(&run).await {
            Ok(BatchOutcome::LimitReached { .. }) => {
                self.stop_from_tick(run_id, StopReason::MaxTradesReached).await
            }
            Ok(_) => TickOutcome::Continue,
            Err(e) => {
                error!(run_id, error = %e, "trade batch failed");
                TickOutcome::Continue
            }
        }
    }

    /// Re-attaches the timer of a run persisted as running.
    ///
    /// # Errors
    /// Returns an error if the running run cannot be loaded.
    pub async fn recover(&self) -> Result<Option<AlgoRun>, RunError> {
        let Some(run) = self.repos.runs.running().await? else {
            return Ok(None);
        };
        if self.attach_timer(run.id).await {
            info!(run_id = run.id, symbol = %run.symbol, "run timer restored");
        }
        Ok(Some(run))
    }

    /// The running run, if any.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn status(&self) -> Result<Option<RunOverview>, RunError> {
        let Some(run) = self.repos.runs.running().await? else {
            return Ok(None);
        };
        let since = self.settings.calendar.day_start(self.clock.now());
        let batches_today = self.repos.trades.count_batches_since(run.id, since).await?;
        let open_positions = self.repos.positions.open_positions_for_run(run.id).await?.len();
        Ok(Some(RunOverview {
            timer_attached: self.timers.is_attached(run.id).await,
            run,
            batches_today,
            open_positions,
        }))
    }

    /// Detaches every timer without stopping any run.
    pub async fn shutdown(&self) {
        let detached = self.timers.detach_all().await;
        if detached > 0 {
            info!(detached, "run timers detached");
        }
    }

    async fn stop_from_tick(&self, run_id: i64, reason: StopReason) -> TickOutcome {
        match self.stop(run_id, reason.clone()).await {
            Ok(_) => TickOutcome::Stopped(reason),
            Err(e) => {
                error!(run_id, %reason, error = %e, "failed to stop run");
                TickOutcome::Continue
            }
        }
    }

    async fn attach_timer(&self, run_id: i64) -> bool {
        let Some(mut shutdown) = self.timers.attach(run_id).await else {
            return false;
        };
        let me = self.me.clone();
        let timers = self.timers.clone();
        let period = self.settings.interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let Some(controller) = me.upgrade() else { break };
                        if controller.tick(run_id).await != TickOutcome::Continue {
                            break;
                        }
                    }
                }
            }

            if !*shutdown.borrow() {
                timers.detach(run_id).await;
            }
            debug!(run_id, "run timer exited");
        });
        true
    }
}
