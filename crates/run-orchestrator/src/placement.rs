//! Trade batches: one placement cycle of a run across every eligible user.

use algo_options_core::{Leg, OrderRequest, TradingUser};
use algo_options_data::{AlgoRun, NewPosition, NewTrade, PositionStatus, TradeMode, TradeStatus};
use algo_options_manager::LegThresholds;
use anyhow::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::controller::RunController;

/// Counters for one placed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub live: usize,
    pub paper: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BatchOutcome {
    Placed(BatchReport),
    /// The run already placed `max_trades_per_day` batches today.
    ///
    /// A batch counts once at least one of its legs was placed (an `ok`
    /// audit row, live or paper). Batches where every leg failed leave only
    /// `error` rows and do not use up the limit.
    LimitReached { batches_today: u32 },
    /// Nothing could be placed this cycle; the run continues.
    Skipped(String),
}

/// A user/leg placement that did not complete.
#[derive(Debug)]
struct LegFailure {
    mode: TradeMode,
    order_id: Option<String>,
    message: String,
}

impl LegFailure {
    fn live(order_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            mode: TradeMode::Live,
            order_id,
            message: message.into(),
        }
    }

    fn paper(message: impl Into<String>) -> Self {
        Self {
            mode: TradeMode::Paper,
            order_id: None,
            message: message.into(),
        }
    }
}

impl RunController {
    /// Runs one placement cycle for `run`.
    ///
    /// Per user/leg failures are recorded as error audit rows and never stop
    /// the rest of the batch. Only batches with an `ok` row count toward
    /// `max_trades_per_day`.
    ///
    /// # Errors
    /// Returns an error when the batch count or the user list cannot be read.
    pub async fn place_trades(&self, run: &AlgoRun) -> Result<BatchOutcome> {
        let since = self.settings.calendar.day_start(self.clock.now());
        let batches_today = self.repos.trades.count_batches_since(run.id, since).await?;
        if batches_today >= run.risk.max_trades_per_day {
            info!(
                run_id = run.id,
                batches_today,
                max = run.risk.max_trades_per_day,
                "daily trade limit reached"
            );
            return Ok(BatchOutcome::LimitReached { batches_today });
        }

        let Some(lot_size) = self.settings.run.lot_size(&run.symbol) else {
            warn!(run_id = run.id, symbol = %run.symbol, "no lot size configured, batch skipped");
            return Ok(BatchOutcome::Skipped(format!(
                "no lot size configured for {}",
                run.symbol
            )));
        };

        let legs = match self
            .strategies
            .resolve_legs(&run.symbol, run.expiry, &run.strategy, lot_size)
            .await
        {
            Ok(legs) if !legs.is_empty() => legs,
            Ok(_) => {
                warn!(run_id = run.id, strategy = %run.strategy, "strategy produced no legs");
                return Ok(BatchOutcome::Skipped("strategy produced no legs".to_string()));
            }
            Err(e) => {
                warn!(run_id = run.id, error = %e, "leg resolution failed, batch skipped");
                return Ok(BatchOutcome::Skipped(e.to_string()));
            }
        };

        let users: Vec<TradingUser> = self
            .users
            .trading_users()
            .await?
            .into_iter()
            .filter(TradingUser::is_eligible)
            .collect();
        if users.is_empty() {
            info!(run_id = run.id, "no eligible users, batch skipped");
            return Ok(BatchOutcome::Skipped("no eligible users".to_string()));
        }

        let mut report = BatchReport {
            batch_id: Uuid::new_v4().to_string(),
            ..BatchReport::default()
        };

        for user in &users {
            for leg in &legs {
                let placed = if user.is_paper() {
                    self.place_paper_leg(run, &report.batch_id, user, leg).await
                } else {
                    self.place_live_leg(run, &report.batch_id, user, leg).await
                };
                match placed {
                    Ok(TradeMode::Live) => report.live += 1,
                    Ok(TradeMode::Paper) => report.paper += 1,
                    Err(failure) => {
                        report.failed += 1;
                        self.record_failure(run, &report.batch_id, user, leg, failure)
                            .await;
                    }
                }
            }
        }

        info!(
            run_id = run.id,
            batch_id = %report.batch_id,
            users = users.len(),
            legs = legs.len(),
            live = report.live,
            paper = report.paper,
            failed = report.failed,
            "trade batch placed"
        );
        Ok(BatchOutcome::Placed(report))
    }

    async fn place_live_leg(
        &self,
        run: &AlgoRun,
        batch_id: &str,
        user: &TradingUser,
        leg: &Leg,
    ) -> Result<TradeMode, LegFailure> {
        let session = match self.repos.sessions.get(&user.client_id).await {
            Ok(Some(s)) => s,
            Ok(None) => return Err(LegFailure::live(None, "no broker session")),
            Err(e) => return Err(LegFailure::live(None, e.to_string())),
        };

        let mut order = OrderRequest::market(
            &leg.exchange,
            &leg.trading_symbol,
            leg.side,
            leg.quantity,
            Some(leg.instrument_token.clone()),
        );
        if let Some(product_type) = &self.settings.product_type {
            order = order.with_product_type(product_type.clone());
        }

        let ack = self.broker.place_order(&session, &order).await.map_err(|e| {
            warn!(
                run_id = run.id,
                client_id = %user.client_id,
                symbol = %leg.trading_symbol,
                error = %e,
                "entry order failed"
            );
            LegFailure::live(None, e.to_string())
        })?;

        let entry_price = match self
            .quotes
            .get_quote(
                &user.client_id,
                &leg.exchange,
                &leg.trading_symbol,
                &leg.instrument_token,
            )
            .await
        {
            Ok(q) => q.price,
            Err(e) => {
                warn!(
                    order_id = %ack.order_id,
                    symbol = %leg.trading_symbol,
                    error = %e,
                    "entry price unavailable, recording 0"
                );
                Decimal::ZERO
            }
        };
        let thresholds = LegThresholds::derive(leg.side, entry_price, &run.risk);

        self.repos
            .positions
            .insert(&NewPosition {
                client_id: user.client_id.clone(),
                broker_order_id: ack.order_id.clone(),
                trading_symbol: leg.trading_symbol.clone(),
                exchange: leg.exchange.clone(),
                side: leg.side,
                quantity: leg.quantity,
                entry_price,
                instrument_token: Some(leg.instrument_token.clone()),
                stop_loss_price: thresholds.stop_loss,
                target_price: thresholds.target,
                status: PositionStatus::Open,
                run_id: Some(run.id),
                strategy: Some(run.strategy.clone()),
                is_paper: false,
            })
            .await
            .map_err(|e| {
                error!(order_id = %ack.order_id, error = %e, "order placed but position not recorded");
                LegFailure::live(
                    Some(ack.order_id.clone()),
                    format!("position not recorded: {e}"),
                )
            })?;

        let mut trade = self.audit_row(run, batch_id, user, leg, TradeMode::Live);
        trade.order_id = Some(ack.order_id.clone());
        self.write_audit(&trade).await;

        debug!(
            order_id = %ack.order_id,
            symbol = %leg.trading_symbol,
            entry_price = %entry_price,
            "live leg opened"
        );
        Ok(TradeMode::Live)
    }

    async fn place_paper_leg(
        &self,
        run: &AlgoRun,
        batch_id: &str,
        user: &TradingUser,
        leg: &Leg,
    ) -> Result<TradeMode, LegFailure> {
        let order_id = format!("PAPER-{}", Uuid::new_v4().simple());

        self.repos
            .positions
            .insert(&NewPosition {
                client_id: user.client_id.clone(),
                broker_order_id: order_id.clone(),
                trading_symbol: leg.trading_symbol.clone(),
                exchange: leg.exchange.clone(),
                side: leg.side,
                quantity: leg.quantity,
                entry_price: Decimal::ZERO,
                instrument_token: Some(leg.instrument_token.clone()),
                stop_loss_price: None,
                target_price: None,
                status: PositionStatus::Open,
                run_id: Some(run.id),
                strategy: Some(run.strategy.clone()),
                is_paper: true,
            })
            .await
            .map_err(|e| LegFailure::paper(e.to_string()))?;

        let mut trade = self.audit_row(run, batch_id, user, leg, TradeMode::Paper);
        trade.order_id = Some(order_id);
        self.write_audit(&trade).await;
        Ok(TradeMode::Paper)
    }

    async fn record_failure(
        &self,
        run: &AlgoRun,
        batch_id: &str,
        user: &TradingUser,
        leg: &Leg,
        failure: LegFailure,
    ) {
        warn!(
            run_id = run.id,
            user_id = %user.user_id,
            symbol = %leg.trading_symbol,
            error = %failure.message,
            "leg placement failed"
        );
        let mut trade = self.audit_row(run, batch_id, user, leg, failure.mode);
        trade.order_id = failure.order_id;
        trade.status = TradeStatus::Error;
        trade.error = Some(failure.message);
        self.write_audit(&trade).await;
    }

    fn audit_row(
        &self,
        run: &AlgoRun,
        batch_id: &str,
        user: &TradingUser,
        leg: &Leg,
        mode: TradeMode,
    ) -> NewTrade {
        NewTrade {
            run_id: run.id,
            batch_id: batch_id.to_string(),
            user_id: user.user_id.clone(),
            client_id: user.client_id.clone(),
            order_id: None,
            trading_symbol: leg.trading_symbol.clone(),
            option_type: leg.option_type,
            strike: leg.strike,
            side: leg.side,
            quantity: leg.quantity,
            mode,
            status: TradeStatus::Ok,
            error: None,
            created_at: self.clock.now(),
        }
    }

    async fn write_audit(&self, trade: &NewTrade) {
        if let Err(e) = self.repos.trades.insert(trade).await {
            error!(
                run_id = trade.run_id,
                order_id = ?trade.order_id,
                error = %e,
                "failed to write trade audit"
            );
        }
    }
}
