use crate::error::{BrokerError, CollaboratorError};
use crate::types::{BrokerSession, Leg, Ltp, OrderAck, OrderRequest, TradingUser};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Order routing and market data for one broker.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn place_order(
        &self,
        session: &BrokerSession,
        order: &OrderRequest,
    ) -> Result<OrderAck, BrokerError>;

    async fn get_ltp(
        &self,
        session: &BrokerSession,
        exchange: &str,
        trading_symbol: &str,
        instrument_token: &str,
    ) -> Result<Ltp, BrokerError>;

    async fn refresh_session(&self, session: &BrokerSession) -> Result<BrokerSession, BrokerError>;
}

#[async_trait]
pub trait InstrumentRepository: Send + Sync {
    async fn resolve_token(
        &self,
        exchange: &str,
        trading_symbol: &str,
    ) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait StrategyResolver: Send + Sync {
    async fn resolve_legs(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        strategy: &str,
        lot_size: u32,
    ) -> Result<Vec<Leg>, CollaboratorError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Users that may trade, before eligibility filtering.
    async fn trading_users(&self) -> Result<Vec<TradingUser>>;
}
