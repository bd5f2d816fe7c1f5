//! Types for options position management.

use algo_options_core::{RiskParams, Side};
use algo_options_data::Position;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Why a position is being squared off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    Target,
    /// Fired by a scheduled auto-exit job.
    Scheduled,
    /// Square-off of a stopped run; carries the run's stop reason.
    RunStopped(String),
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop_loss"),
            Self::Target => write!(f, "target"),
            Self::Scheduled => write!(f, "auto_exit"),
            Self::RunStopped(reason) => write!(f, "run_stopped: {reason}"),
        }
    }
}

/// Result of an exit attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// This call squared the position off.
    Closed {
        exit_order_id: Option<String>,
        exit_price: Decimal,
    },
    /// Another actor holds the exit or the position is no longer OPEN.
    AlreadyHandled,
    /// Live position whose client has no broker session; left OPEN.
    NoSession,
}

impl ExitOutcome {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

/// Absolute stop-loss and target prices for one leg.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegThresholds {
    pub stop_loss: Option<Decimal>,
    pub target: Option<Decimal>,
}

impl LegThresholds {
    /// Prices stored on the position itself.
    #[must_use]
    pub fn from_position(pos: &Position) -> Self {
        Self {
            stop_loss: pos.stop_loss_price,
            target: pos.target_price,
        }
    }

    /// Prices derived from a run's percentages. A zero entry (paper leg)
    /// yields no thresholds.
    #[must_use]
    pub fn derive(side: Side, entry: Decimal, risk: &RiskParams) -> Self {
        if entry <= Decimal::ZERO {
            return Self::default();
        }
        let sl = risk.stop_loss_percent / HUNDRED;
        let tp = risk.target_percent / HUNDRED;
        match side {
            Side::Buy => Self {
                stop_loss: Some(entry * (Decimal::ONE - sl)),
                target: Some(entry * (Decimal::ONE + tp)),
            },
            Side::Sell => Self {
                stop_loss: Some(entry * (Decimal::ONE + sl)),
                target: Some(entry * (Decimal::ONE - tp)),
            },
        }
    }

    /// Position-level prices win; run percentages fill whatever is unset.
    #[must_use]
    pub fn for_position(pos: &Position, risk: &RiskParams) -> Self {
        let own = Self::from_position(pos);
        let derived = Self::derive(pos.side, pos.entry_price, risk);
        Self {
            stop_loss: own.stop_loss.or(derived.stop_loss),
            target: own.target.or(derived.target),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stop_loss.is_none() && self.target.is_none()
    }
}
