//! Position watchdog: checks every OPEN position against its stop-loss and
//! target and squares off the ones that crossed.

use std::sync::Arc;

use algo_options_core::InstrumentRepository;
use algo_options_data::{Position, PositionRepository};
use anyhow::Result;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::QuoteError;
use crate::executor::ExitExecutor;
use crate::quote_cache::QuoteCache;
use crate::stops::check_exit_rules;
use crate::types::{ExitOutcome, LegThresholds};

/// Counters for one watchdog cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub scanned: usize,
    pub triggered: usize,
    pub closed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// The cycle stopped early because the broker throttled quotes.
    pub rate_limited: bool,
}

enum Check {
    Skipped,
    Quiet,
    Triggered { closed: bool },
}

pub struct PositionWatchdog {
    positions: PositionRepository,
    instruments: Arc<dyn InstrumentRepository>,
    quotes: Arc<QuoteCache>,
    exits: Arc<ExitExecutor>,
    /// Client whose session prices every quote; the position's own client otherwise.
    market_data_client_id: Option<String>,
}

impl std::fmt::Debug for PositionWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionWatchdog")
            .field("market_data_client_id", &self.market_data_client_id)
            .finish_non_exhaustive()
    }
}

impl PositionWatchdog {
    #[must_use]
    pub fn new(
        positions: PositionRepository,
        instruments: Arc<dyn InstrumentRepository>,
        quotes: Arc<QuoteCache>,
        exits: Arc<ExitExecutor>,
        market_data_client_id: Option<String>,
    ) -> Self {
        Self {
            positions,
            instruments,
            quotes,
            exits,
            market_data_client_id,
        }
    }

    /// Runs one scan over all OPEN positions.
    ///
    /// # Errors
    /// Returns an error only when the OPEN positions cannot be loaded; every
    /// per-position failure is logged and counted instead.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let open = self.positions.open_positions().await?;
        let mut report = CycleReport::default();

        for pos in &open {
            report.scanned += 1;
            match self.check_position(pos).await {
                Ok(Check::Skipped) => report.skipped += 1,
                Ok(Check::Quiet) => {}
                Ok(Check::Triggered { closed }) => {
                    report.triggered += 1;
                    if closed {
                        report.closed += 1;
                    }
                }
                Err(QuoteError::RateLimited) => {
                    warn!(
                        position_id = pos.id,
                        remaining = open.len() - report.scanned,
                        "quotes rate limited, ending cycle early"
                    );
                    report.rate_limited = true;
                    break;
                }
                Err(e) => {
                    warn!(position_id = pos.id, error = %e, "position check failed");
                    report.failed += 1;
                }
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                triggered = report.triggered,
                closed = report.closed,
                skipped = report.skipped,
                failed = report.failed,
                rate_limited = report.rate_limited,
                "watchdog cycle complete"
            );
        }
        Ok(report)
    }

    async fn check_position(&self, pos: &Position) -> Result<Check, QuoteError> {
        let thresholds = LegThresholds::from_position(pos);
        if thresholds.is_empty() {
            return Ok(Check::Skipped);
        }

        let Some(token) = self.instrument_token(pos).await else {
            return Ok(Check::Skipped);
        };

        let client_id = self
            .market_data_client_id
            .as_deref()
            .unwrap_or(&pos.client_id);
        let quote = match self
            .quotes
            .get_quote(client_id, &pos.exchange, &pos.trading_symbol, &token)
            .await
        {
            Ok(q) => q,
            Err(QuoteError::RateLimited) => return Err(QuoteError::RateLimited),
            Err(e) => {
                debug!(position_id = pos.id, error = %e, "no quote, skipping");
                return Ok(Check::Skipped);
            }
        };

        let Some(reason) = check_exit_rules(pos.side, quote.price, &thresholds) else {
            return Ok(Check::Quiet);
        };

        info!(
            position_id = pos.id,
            symbol = %pos.trading_symbol,
            price = %quote.price,
            %reason,
            "exit triggered"
        );

        match self.exits.close(pos, &reason, Some(quote.price)).await {
            Ok(outcome) => Ok(Check::Triggered {
                closed: matches!(outcome, ExitOutcome::Closed { .. }),
            }),
            Err(e) => {
                error!(position_id = pos.id, error = %e, "exit failed");
                Ok(Check::Triggered { closed: false })
            }
        }
    }

    /// Token from the record, or resolved and persisted.
    async fn instrument_token(&self, pos: &Position) -> Option<String> {
        if let Some(token) = &pos.instrument_token {
            return Some(token.clone());
        }

        match self
            .instruments
            .resolve_token(&pos.exchange, &pos.trading_symbol)
            .await
        {
            Ok(token) => {
                if let Err(e) = self.positions.set_instrument_token(pos.id, &token).await {
                    warn!(position_id = pos.id, error = %e, "failed to persist instrument token");
                }
                Some(token)
            }
            Err(e) => {
                warn!(position_id = pos.id, error = %e, "instrument token unresolved, skipping");
                None
            }
        }
    }
}
