//! Leg placement audit record ("AlgoTrade"). Write-once.

use algo_options_core::{OptionType, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Live,
    Paper,
}

impl TradeMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Paper => "paper",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "live" => Some(Self::Live),
            "paper" => Some(Self::Paper),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Ok,
    Error,
}

impl TradeStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Self::Ok),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgoTrade {
    pub id: i64,
    pub run_id: i64,
    pub batch_id: String,
    pub user_id: String,
    pub client_id: String,
    pub order_id: Option<String>,
    pub trading_symbol: String,
    pub option_type: OptionType,
    pub strike: Decimal,
    pub side: Side,
    pub quantity: u32,
    pub mode: TradeMode,
    pub status: TradeStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrade {
    pub run_id: i64,
    pub batch_id: String,
    pub user_id: String,
    pub client_id: String,
    pub order_id: Option<String>,
    pub trading_symbol: String,
    pub option_type: OptionType,
    pub strike: Decimal,
    pub side: Side,
    pub quantity: u32,
    pub mode: TradeMode,
    pub status: TradeStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
