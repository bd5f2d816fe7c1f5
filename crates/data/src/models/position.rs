//! Position data model.
//!
//! One row per option leg. Rows are never deleted; closing a leg writes the
//! exit fields together with the status change.

use algo_options_core::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    /// Order sent, fill not yet confirmed.
    Pending,
    /// Broker reported the order complete.
    Complete,
    /// Live leg under watch.
    Open,
    /// Squared off.
    Closed,
    /// Broker refused the entry order.
    Rejected,
}

impl PositionStatus {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Complete => "COMPLETE",
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::Rejected => "REJECTED",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "COMPLETE" => Some(Self::Complete),
            "OPEN" => Some(Self::Open),
            "CLOSED" => Some(Self::Closed),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Complete, Self::Open)
                | (Self::Open, Self::Closed)
                | (Self::Pending, Self::Rejected)
        )
    }
}

/// State of a scheduled auto-exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoExitStatus {
    Scheduled,
    Cancelled,
    Executed,
    Failed,
}

impl AutoExitStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Cancelled => "cancelled",
            Self::Executed => "executed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "cancelled" => Some(Self::Cancelled),
            "executed" => Some(Self::Executed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Auto-exit scheduling fields carried on a position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoExit {
    pub enabled: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub job_id: Option<String>,
    pub status: Option<AutoExitStatus>,
}

/// A stored option leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub client_id: String,
    pub broker_order_id: String,
    pub trading_symbol: String,
    pub exchange: String,
    pub side: Side,
    pub quantity: u32,
    pub entry_price: Decimal,
    pub instrument_token: Option<String>,
    pub stop_loss_price: Option<Decimal>,
    pub target_price: Option<Decimal>,
    pub status: PositionStatus,
    pub exit_order_id: Option<String>,
    pub exit_price: Option<Decimal>,
    pub exit_at: Option<DateTime<Utc>>,
    pub run_id: Option<i64>,
    pub strategy: Option<String>,
    pub auto_exit: AutoExit,
    pub is_paper: bool,
    pub created_at: DateTime<Utc>,
}

impl Position {
    /// Entry price times quantity.
    #[must_use]
    pub fn entry_notional(&self) -> Decimal {
        self.entry_price * Decimal::from(self.quantity)
    }

    /// Signed P&L if the leg were marked at `price`.
    #[must_use]
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        let qty = Decimal::from(self.quantity);
        match self.side {
            Side::Buy => (price - self.entry_price) * qty,
            Side::Sell => (self.entry_price - price) * qty,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

/// Insert payload for a new position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPosition {
    pub client_id: String,
    pub broker_order_id: String,
    pub trading_symbol: String,
    pub exchange: String,
    pub side: Side,
    pub quantity: u32,
    pub entry_price: Decimal,
    pub instrument_token: Option<String>,
    pub stop_loss_price: Option<Decimal>,
    pub target_price: Option<Decimal>,
    pub status: PositionStatus,
    pub run_id: Option<i64>,
    pub strategy: Option<String>,
    pub is_paper: bool,
}
