//! Profit target rule.

use algo_options_core::Side;
use rust_decimal::Decimal;

/// BUY legs take profit when price rises to the target, SELL legs when it
/// falls to it.
#[must_use]
pub fn target_hit(side: Side, price: Decimal, target: Decimal) -> bool {
    match side {
        Side::Buy => price >= target,
        Side::Sell => price <= target,
    }
}
