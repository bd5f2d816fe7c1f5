//! Broker-agnostic trading types shared by every component.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that squares off a position opened on `self`.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    /// Parses from string representation (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Option right as listed on Indian exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    #[serde(rename = "CE")]
    Call,
    #[serde(rename = "PE")]
    Put,
}

impl OptionType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Call => "CE",
            Self::Put => "PE",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CE" | "CALL" => Some(Self::Call),
            "PE" | "PUT" => Some(Self::Put),
            _ => None,
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit { price: Decimal },
}

/// An order to route through a [`crate::BrokerGateway`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub exchange: String,
    pub trading_symbol: String,
    pub side: Side,
    pub quantity: u32,
    pub order_type: OrderType,
    pub instrument_token: Option<String>,
    pub product_type: Option<String>,
}

impl OrderRequest {
    /// A MARKET order with no product type override.
    #[must_use]
    pub fn market(
        exchange: impl Into<String>,
        trading_symbol: impl Into<String>,
        side: Side,
        quantity: u32,
        instrument_token: Option<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            trading_symbol: trading_symbol.into(),
            side,
            quantity,
            order_type: OrderType::Market,
            instrument_token,
            product_type: None,
        }
    }

    #[must_use]
    pub fn with_product_type(mut self, product_type: impl Into<String>) -> Self {
        self.product_type = Some(product_type.into());
        self
    }
}

/// Broker acknowledgement of an accepted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    /// Untouched broker payload, kept for the audit trail.
    pub raw: serde_json::Value,
}

/// Last traded price snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ltp {
    pub price: Decimal,
    pub open_interest: Option<u64>,
}

/// Authenticated broker session for one client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSession {
    pub client_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub feed_token: Option<String>,
}

impl std::fmt::Debug for BrokerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSession")
            .field("client_id", &self.client_id)
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

/// One concrete option leg produced by a [`crate::StrategyResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    pub side: Side,
    pub option_type: OptionType,
    pub exchange: String,
    pub trading_symbol: String,
    pub strike: Decimal,
    pub instrument_token: String,
    pub quantity: u32,
    pub expiry: NaiveDate,
}

/// Licence attached to a trading account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LicenceMode {
    #[default]
    Live,
    Demo,
    Expired,
}

/// A user account as seen by the run controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingUser {
    pub user_id: String,
    pub client_id: String,
    pub active: bool,
    pub trading_enabled: bool,
    pub licence: LicenceMode,
}

impl TradingUser {
    /// Whether orders may be placed for this user at all.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.active && self.trading_enabled && self.licence != LicenceMode::Expired
    }

    /// Demo licences trade on paper only.
    #[must_use]
    pub fn is_paper(&self) -> bool {
        self.licence == LicenceMode::Demo
    }
}
