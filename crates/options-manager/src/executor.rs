//! Squares off positions.
//!
//! Every exit path (watchdog, risk enforcement, scheduled exits, run stops)
//! goes through [`ExitExecutor::close`]. An exit first takes the position's
//! exit claim in the store; only the claim holder talks to the broker, and
//! the OPEN→CLOSED transition is bound to that claim. Concurrent triggers on
//! one position therefore produce exactly one exit order.

use std::sync::Arc;
use std::time::Duration;

use algo_options_core::{BrokerError, BrokerGateway, Clock, OrderRequest};
use algo_options_data::{AutoExitStatus, ExitFill, Position, PositionRepository, SessionRepository};
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ExitError;
use crate::jobs::JobScheduler;
use crate::types::{ExitOutcome, ExitReason};

/// Job key of a position's scheduled exit.
#[must_use]
pub fn auto_exit_job_key(position_id: i64) -> String {
    format!("auto-exit-{position_id}")
}

#[derive(Debug, Clone)]
pub struct ExitSettings {
    /// Claims older than this are considered abandoned.
    pub claim_ttl: Duration,
    /// Product type stamped on exit orders.
    pub product_type: Option<String>,
}

impl Default for ExitSettings {
    fn default() -> Self {
        Self {
            claim_ttl: Duration::from_secs(60),
            product_type: None,
        }
    }
}

pub struct ExitExecutor {
    positions: PositionRepository,
    sessions: SessionRepository,
    broker: Arc<dyn BrokerGateway>,
    jobs: Arc<dyn JobScheduler>,
    clock: Arc<dyn Clock>,
    settings: ExitSettings,
}

impl std::fmt::Debug for ExitExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitExecutor")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ExitExecutor {
    #[must_use]
    pub fn new(
        positions: PositionRepository,
        sessions: SessionRepository,
        broker: Arc<dyn BrokerGateway>,
        jobs: Arc<dyn JobScheduler>,
        clock: Arc<dyn Clock>,
        settings: ExitSettings,
    ) -> Self {
        Self {
            positions,
            sessions,
            broker,
            jobs,
            clock,
            settings,
        }
    }

    /// Squares off `position` at `observed_price` (0 when unknown).
    ///
    /// # Errors
    /// `Broker` when the exit order was not accepted, `Store` when the store
    /// failed. The position stays OPEN and its claim is released.
    pub async fn close(
        &self,
        position: &Position,
        reason: &ExitReason,
        observed_price: Option<Decimal>,
    ) -> Result<ExitOutcome, ExitError> {
        let claim = Uuid::new_v4().to_string();
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.settings.claim_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        if !self
            .positions
            .claim_exit(position.id, &claim, now, now - ttl)
            .await?
        {
            info!(position_id = position.id, %reason, "exit already handled elsewhere");
            return Ok(ExitOutcome::AlreadyHandled);
        }

        let exit_order_id = if position.is_paper {
            None
        } else {
            match self.place_exit_order(position, reason, &claim).await? {
                Some(order_id) => Some(order_id),
                None => return Ok(ExitOutcome::NoSession),
            }
        };

        let exit_price = observed_price.unwrap_or(Decimal::ZERO);
        let fill = ExitFill {
            exit_order_id: exit_order_id.clone(),
            exit_price,
            exit_at: self.clock.now(),
        };

        if !self.positions.close(position.id, &claim, &fill).await? {
            error!(
                position_id = position.id,
                exit_order_id = ?exit_order_id,
                "exit order placed but claim was lost before close"
            );
            return Ok(ExitOutcome::AlreadyHandled);
        }

        info!(
            position_id = position.id,
            symbol = %position.trading_symbol,
            %reason,
            exit_price = %exit_price,
            exit_order_id = ?exit_order_id,
            paper = position.is_paper,
            "position closed"
        );

        self.settle_auto_exit(position.id, reason).await;

        Ok(ExitOutcome::Closed {
            exit_order_id,
            exit_price,
        })
    }

    /// Places the opposite-side MARKET order. `None` when the client has no
    /// session. The claim is released on every failure.
    async fn place_exit_order(
        &self,
        position: &Position,
        reason: &ExitReason,
        claim: &str,
    ) -> Result<Option<String>, ExitError> {
        let session = match self.sessions.get(&position.client_id).await {
            Ok(Some(s)) => s,
            Ok(None) => {
                warn!(
                    position_id = position.id,
                    client_id = %position.client_id,
                    "no broker session, exit skipped"
                );
                self.release(position.id, claim).await;
                return Ok(None);
            }
            Err(e) => {
                self.release(position.id, claim).await;
                return Err(ExitError::Store(e));
            }
        };

        let mut order = OrderRequest::market(
            position.exchange.clone(),
            position.trading_symbol.clone(),
            position.side.opposite(),
            position.quantity,
            position.instrument_token.clone(),
        );
        if let Some(product_type) = &self.settings.product_type {
            order = order.with_product_type(product_type.clone());
        }

        match self.broker.place_order(&session, &order).await {
            Ok(ack) => Ok(Some(ack.order_id)),
            Err(e) => {
                let payload = match &e {
                    BrokerError::Rejected { raw: Some(raw), .. } => raw.to_string(),
                    _ => String::new(),
                };
                error!(
                    position_id = position.id,
                    symbol = %position.trading_symbol,
                    %reason,
                    error = %e,
                    payload = %payload,
                    "exit order failed, position stays open"
                );
                self.release(position.id, claim).await;
                Err(ExitError::Broker(e))
            }
        }
    }

    async fn release(&self, position_id: i64, claim: &str) {
        if let Err(e) = self.positions.release_exit_claim(position_id, claim).await {
            error!(position_id, error = %e, "failed to release exit claim");
        }
    }

    /// Cancels a pending scheduled exit, or marks it executed when it is the
    /// one closing the position.
    async fn settle_auto_exit(&self, position_id: i64, reason: &ExitReason) {
        let status = if *reason == ExitReason::Scheduled {
            AutoExitStatus::Executed
        } else {
            if let Err(e) = self.jobs.cancel(&auto_exit_job_key(position_id)).await {
                warn!(position_id, error = %e, "failed to cancel auto-exit job");
            }
            AutoExitStatus::Cancelled
        };
        if let Err(e) = self.positions.finish_auto_exit(position_id, status).await {
            warn!(position_id, error = %e, "failed to update auto-exit status");
        }
    }
}
