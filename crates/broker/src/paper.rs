//! Paper trading broker.
//!
//! Simulates order fills without touching the broker. Market data comes from
//! an optional upstream gateway, otherwise from prices set on the broker.

use std::collections::HashMap;
use std::sync::Arc;

use algo_options_core::{BrokerError, BrokerGateway, BrokerSession, Ltp, OrderAck, OrderRequest};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

/// Broker that accepts every order locally.
#[derive(Default)]
pub struct PaperBroker {
    market_data: Option<Arc<dyn BrokerGateway>>,
    prices: RwLock<HashMap<String, Decimal>>,
    orders: RwLock<Vec<OrderRequest>>,
}

impl std::fmt::Debug for PaperBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperBroker")
            .field("has_market_data", &self.market_data.is_some())
            .field("orders", &self.orders.read().len())
            .finish()
    }
}

impl PaperBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Paper fills, real quotes and session refreshes from `upstream`.
    #[must_use]
    pub fn with_market_data(upstream: Arc<dyn BrokerGateway>) -> Self {
        Self {
            market_data: Some(upstream),
            ..Self::default()
        }
    }

    /// Sets the price served for `instrument_token` when no upstream is set.
    pub fn set_price(&self, instrument_token: impl Into<String>, price: Decimal) {
        self.prices.write().insert(instrument_token.into(), price);
    }

    /// Orders accepted so far, oldest first.
    #[must_use]
    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.read().clone()
    }
}

#[async_trait]
impl BrokerGateway for PaperBroker {
    async fn place_order(
        &self,
        session: &BrokerSession,
        order: &OrderRequest,
    ) -> Result<OrderAck, BrokerError> {
        if order.quantity == 0 {
            return Err(BrokerError::rejected("quantity must be positive", None));
        }

        let order_id = format!("PAPER-{}", Uuid::new_v4().simple());
        self.orders.write().push(order.clone());

        info!(
            order_id = %order_id,
            client_id = %session.client_id,
            symbol = %order.trading_symbol,
            side = %order.side,
            quantity = order.quantity,
            "Paper fill simulated"
        );

        Ok(OrderAck {
            raw: serde_json::json!({
                "orderid": order_id,
                "paper": true,
                "filled_at": Utc::now().to_rfc3339(),
            }),
            order_id,
        })
    }

    async fn get_ltp(
        &self,
        session: &BrokerSession,
        exchange: &str,
        trading_symbol: &str,
        instrument_token: &str,
    ) -> Result<Ltp, BrokerError> {
        if let Some(upstream) = &self.market_data {
            return upstream
                .get_ltp(session, exchange, trading_symbol, instrument_token)
                .await;
        }

        self.prices
            .read()
            .get(instrument_token)
            .map(|price| Ltp {
                price: *price,
                open_interest: None,
            })
            .ok_or_else(|| BrokerError::Api {
                status: 404,
                message: format!("no paper price for {exchange}:{trading_symbol} ({instrument_token})"),
            })
    }

    async fn refresh_session(&self, session: &BrokerSession) -> Result<BrokerSession, BrokerError> {
        match &self.market_data {
            Some(upstream) => upstream.refresh_session(session).await,
            None => Ok(session.clone()),
        }
    }
}
