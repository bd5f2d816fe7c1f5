//! Run-level risk: per-leg stop/target enforcement plus the aggregate
//! max-loss check over a run's open legs.

use std::sync::Arc;

use algo_options_data::{AlgoRun, Position, PositionRepository};
use anyhow::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::QuoteError;
use crate::executor::ExitExecutor;
use crate::quote_cache::QuoteCache;
use crate::stops::check_exit_rules;
use crate::types::LegThresholds;

/// Aggregate exposure of a run at evaluation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RiskSnapshot {
    pub total_entry_notional: Decimal,
    pub total_pnl: Decimal,
    /// `total_pnl / total_entry_notional * 100` at full precision; zero
    /// without exposure.
    pub loss_percent: Decimal,
    pub legs: usize,
}

impl RiskSnapshot {
    fn add(&mut self, pos: &Position, price: Decimal) {
        self.total_entry_notional += pos.entry_notional();
        self.total_pnl += pos.unrealized_pnl(price);
        self.legs += 1;
    }

    fn finish(mut self) -> Self {
        if self.total_entry_notional > Decimal::ZERO {
            self.loss_percent =
                self.total_pnl / self.total_entry_notional * Decimal::ONE_HUNDRED;
        }
        self
    }

    /// True once the loss reaches `max_loss_percent`.
    #[must_use]
    pub fn breaches(&self, max_loss_percent: Decimal) -> bool {
        self.total_entry_notional > Decimal::ZERO && self.loss_percent <= -max_loss_percent
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskVerdict {
    Continue(RiskSnapshot),
    /// Aggregate loss breached the run's limit.
    StopRun(RiskSnapshot),
    /// Quotes were throttled; nothing decided this tick.
    Deferred,
}

impl RiskVerdict {
    #[must_use]
    pub fn should_stop(&self) -> bool {
        matches!(self, Self::StopRun(_))
    }
}

pub struct RiskEnforcer {
    positions: PositionRepository,
    quotes: Arc<QuoteCache>,
    exits: Arc<ExitExecutor>,
}

impl std::fmt::Debug for RiskEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskEnforcer").finish_non_exhaustive()
    }
}

impl RiskEnforcer {
    #[must_use]
    pub fn new(
        positions: PositionRepository,
        quotes: Arc<QuoteCache>,
        exits: Arc<ExitExecutor>,
    ) -> Self {
        Self {
            positions,
            quotes,
            exits,
        }
    }

    /// Evaluates `run` against its open legs, closing any leg that crossed
    /// its threshold.
    ///
    /// # Errors
    /// Returns an error if the run's positions cannot be loaded.
    pub async fn evaluate(&self, run: &AlgoRun) -> Result<RiskVerdict> {
        let open = self.positions.open_positions_for_run(run.id).await?;
        let mut snapshot = RiskSnapshot::default();

        for pos in &open {
            if pos.is_paper || pos.entry_price <= Decimal::ZERO {
                continue;
            }
            let Some(token) = pos.instrument_token.as_deref() else {
                debug!(position_id = pos.id, "no instrument token, leg not priced");
                continue;
            };

            let price = match self
                .quotes
                .get_quote(&pos.client_id, &pos.exchange, &pos.trading_symbol, token)
                .await
            {
                Ok(q) => q.price,
                Err(QuoteError::RateLimited) => {
                    warn!(run_id = run.id, "quotes rate limited, risk check deferred");
                    return Ok(RiskVerdict::Deferred);
                }
                Err(e) => {
                    warn!(position_id = pos.id, error = %e, "no quote, leg not priced");
                    continue;
                }
            };

            snapshot.add(pos, price);

            let thresholds = LegThresholds::for_position(pos, &run.risk);
            if let Some(reason) = check_exit_rules(pos.side, price, &thresholds) {
                info!(
                    run_id = run.id,
                    position_id = pos.id,
                    price = %price,
                    %reason,
                    "leg threshold crossed"
                );
                if let Err(e) = self.exits.close(pos, &reason, Some(price)).await {
                    error!(position_id = pos.id, error = %e, "leg exit failed");
                }
            }
        }

        let snapshot = snapshot.finish();
        if snapshot.breaches(run.risk.max_loss_percent) {
            warn!(
                run_id = run.id,
                loss_percent = %snapshot.loss_percent.round_dp(4),
                max_loss_percent = %run.risk.max_loss_percent,
                total_pnl = %snapshot.total_pnl,
                "run max loss breached"
            );
            return Ok(RiskVerdict::StopRun(snapshot));
        }

        debug!(
            run_id = run.id,
            legs = snapshot.legs,
            loss_percent = %snapshot.loss_percent.round_dp(4),
            "risk check passed"
        );
        Ok(RiskVerdict::Continue(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExitSettings;
    use crate::jobs::{InMemoryJobScheduler, RetryPolicy};
    use crate::testing::{open_position, session, FakeBroker};
    use algo_options_core::{BrokerError, ManualClock, RiskParams, Side};
    use algo_options_data::{Database, NewPosition, NewRun, Repositories};
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Harness {
        repos: Repositories,
        broker: Arc<FakeBroker>,
        enforcer: RiskEnforcer,
        run: AlgoRun,
    }

    async fn harness(risk: RiskParams) -> Harness {
        let db = Database::in_memory().await.unwrap();
        let repos = db.repositories();
        repos.sessions.upsert(&session("C1", "jwt")).await.unwrap();
        let run = repos
            .runs
            .try_insert_running(
                &NewRun {
                    symbol: "NIFTY".to_string(),
                    expiry: NaiveDate::from_ymd_opt(2026, 10, 27).unwrap(),
                    strategy: "short_straddle".to_string(),
                    created_by: "ops".to_string(),
                    risk,
                },
                Utc::now(),
            )
            .await
            .unwrap()
            .unwrap();
        let broker = Arc::new(FakeBroker::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let quotes = Arc::new(QuoteCache::new(
            broker.clone(),
            repos.sessions.clone(),
            clock.clone(),
            Duration::from_millis(1500),
        ));
        let exits = Arc::new(ExitExecutor::new(
            repos.positions.clone(),
            repos.sessions.clone(),
            broker.clone(),
            Arc::new(InMemoryJobScheduler::new(RetryPolicy::default())),
            clock,
            ExitSettings::default(),
        ));
        let enforcer = RiskEnforcer::new(repos.positions.clone(), quotes, exits);
        Harness {
            repos,
            broker,
            enforcer,
            run,
        }
    }

    fn leg(run_id: i64, oid: &str, side: Side, entry: Decimal, qty: u32) -> NewPosition {
        let mut p = open_position(oid, side, entry);
        p.run_id = Some(run_id);
        p.quantity = qty;
        p
    }

    fn wide_legs() -> RiskParams {
        RiskParams {
            max_trades_per_day: 3,
            max_loss_percent: dec!(2),
            stop_loss_percent: dec!(30),
            target_percent: dec!(50),
        }
    }

    #[tokio::test]
    async fn loss_beyond_limit_stops_run() {
        let h = harness(wide_legs()).await;
        h.repos
            .positions
            .insert(&leg(h.run.id, "R1", Side::Sell, dec!(150), 100))
            .await
            .unwrap();
        h.broker.set_price("T-R1", dec!(155));

        let verdict = h.enforcer.evaluate(&h.run).await.unwrap();

        let RiskVerdict::StopRun(snapshot) = verdict else {
            panic!("expected stop, got {verdict:?}");
        };
        assert_eq!(snapshot.total_entry_notional, dec!(15000));
        assert_eq!(snapshot.total_pnl, dec!(-500));
        assert_eq!(snapshot.loss_percent.round_dp(4), dec!(-3.3333));
    }

    #[tokio::test]
    async fn loss_just_short_of_limit_continues() {
        let h = harness(wide_legs()).await;
        h.repos
            .positions
            .insert(&leg(h.run.id, "R1", Side::Sell, dec!(100), 1000))
            .await
            .unwrap();
        // -1999.99 on 100000: -1.9999900%, which four decimals would show as -2
        h.broker.set_price("T-R1", dec!(101.99999));

        let verdict = h.enforcer.evaluate(&h.run).await.unwrap();

        let RiskVerdict::Continue(snapshot) = verdict else {
            panic!("expected continue, got {verdict:?}");
        };
        assert_eq!(snapshot.total_pnl, dec!(-1999.99));
        assert!(snapshot.loss_percent > dec!(-2));
        assert!(h.broker.orders().is_empty());
    }

    #[tokio::test]
    async fn losses_are_weighed_against_combined_notional() {
        let h = harness(wide_legs()).await;
        let small = h
            .repos
            .positions
            .insert(&leg(h.run.id, "R1", Side::Sell, dec!(100), 10))
            .await
            .unwrap();
        let large = h
            .repos
            .positions
            .insert(&leg(h.run.id, "R2", Side::Sell, dec!(100), 20))
            .await
            .unwrap();
        // -60 on 1000 and -40 on 2000: each leg well inside its 30% stop
        h.broker.set_price("T-R1", dec!(106));
        h.broker.set_price("T-R2", dec!(102));

        let verdict = h.enforcer.evaluate(&h.run).await.unwrap();

        let RiskVerdict::StopRun(snapshot) = verdict else {
            panic!("expected stop, got {verdict:?}");
        };
        assert_eq!(snapshot.legs, 2);
        assert_eq!(snapshot.total_entry_notional, dec!(3000));
        assert_eq!(snapshot.total_pnl, dec!(-100));
        assert_eq!(snapshot.loss_percent.round_dp(2), dec!(-3.33));
        // leg thresholds did not fire, closing is left to the run stop
        assert!(h.broker.orders().is_empty());
        for id in [small, large] {
            let pos = h.repos.positions.get(id).await.unwrap().unwrap();
            assert!(pos.is_open());
        }
    }

    #[tokio::test]
    async fn loss_within_limit_continues() {
        let h = harness(wide_legs()).await;
        h.repos
            .positions
            .insert(&leg(h.run.id, "R1", Side::Sell, dec!(150), 100))
            .await
            .unwrap();
        h.broker.set_price("T-R1", dec!(151));

        let verdict = h.enforcer.evaluate(&h.run).await.unwrap();

        assert!(matches!(verdict, RiskVerdict::Continue(_)));
        assert!(h.broker.orders().is_empty());
    }

    #[tokio::test]
    async fn crossed_leg_is_closed_at_derived_stop() {
        let h = harness(RiskParams {
            max_loss_percent: dec!(100),
            ..wide_legs()
        })
        .await;
        let id = h
            .repos
            .positions
            .insert(&leg(h.run.id, "R1", Side::Buy, dec!(100), 75))
            .await
            .unwrap();
        // BUY stop at 100 * (1 - 0.30) = 70
        h.broker.set_price("T-R1", dec!(69));

        let verdict = h.enforcer.evaluate(&h.run).await.unwrap();

        assert!(!verdict.should_stop());
        let pos = h.repos.positions.get(id).await.unwrap().unwrap();
        assert!(!pos.is_open());
        assert_eq!(pos.exit_price, Some(dec!(69)));
    }

    #[tokio::test]
    async fn paper_legs_are_excluded() {
        let h = harness(wide_legs()).await;
        let mut paper = leg(h.run.id, "PAPER-1", Side::Sell, Decimal::ZERO, 75);
        paper.is_paper = true;
        h.repos.positions.insert(&paper).await.unwrap();

        let verdict = h.enforcer.evaluate(&h.run).await.unwrap();

        assert_eq!(verdict, RiskVerdict::Continue(RiskSnapshot::default()));
        assert_eq!(h.broker.ltp_calls(), 0);
    }

    #[tokio::test]
    async fn rate_limit_defers_verdict() {
        let h = harness(wide_legs()).await;
        for oid in ["R1", "R2"] {
            h.repos
                .positions
                .insert(&leg(h.run.id, oid, Side::Sell, dec!(150), 100))
                .await
                .unwrap();
        }
        h.broker.set_price("T-R1", dec!(200));
        h.broker.set_price("T-R2", dec!(200));
        h.broker.push_ltp_error(BrokerError::RateLimited { status: 429 });

        let verdict = h.enforcer.evaluate(&h.run).await.unwrap();

        assert_eq!(verdict, RiskVerdict::Deferred);
        assert!(h.broker.orders().is_empty());
    }
}
