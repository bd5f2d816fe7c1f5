//! Stop-loss rule and the combined exit check.

use algo_options_core::Side;
use rust_decimal::Decimal;

use crate::targets::target_hit;
use crate::types::{ExitReason, LegThresholds};

/// BUY legs stop out when price falls to the stop, SELL legs when it rises to it.
#[must_use]
pub fn stop_loss_hit(side: Side, price: Decimal, stop_loss: Decimal) -> bool {
    match side {
        Side::Buy => price <= stop_loss,
        Side::Sell => price >= stop_loss,
    }
}

/// Checks stop-loss then target. Stop-loss wins when both are crossed.
#[must_use]
pub fn check_exit_rules(
    side: Side,
    price: Decimal,
    thresholds: &LegThresholds,
) -> Option<ExitReason> {
    if let Some(sl) = thresholds.stop_loss {
        if stop_loss_hit(side, price, sl) {
            tracing::warn!(
                side = %side,
                price = %price,
                stop_loss = %sl,
                "Stop loss triggered"
            );
            return Some(ExitReason::StopLoss);
        }
    }

    if let Some(tp) = thresholds.target {
        if target_hit(side, price, tp) {
            tracing::info!(side = %side, price = %price, target = %tp, "Target hit");
            return Some(ExitReason::Target);
        }
    }

    None
}
