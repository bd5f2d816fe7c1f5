//! Hand-written collaborator fakes for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use algo_options_core::{
    BrokerError, BrokerGateway, BrokerSession, CollaboratorError, InstrumentRepository, Ltp,
    OrderAck, OrderRequest, Side,
};
use algo_options_data::{NewPosition, PositionStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

pub fn session(client_id: &str, token: &str) -> BrokerSession {
    BrokerSession {
        client_id: client_id.to_string(),
        access_token: token.to_string(),
        refresh_token: Some("refresh".to_string()),
        feed_token: None,
    }
}

pub fn open_position(order_id: &str, side: Side, entry: Decimal) -> NewPosition {
    NewPosition {
        client_id: "C1".to_string(),
        broker_order_id: order_id.to_string(),
        trading_symbol: format!("NIFTY-{order_id}"),
        exchange: "NFO".to_string(),
        side,
        quantity: 75,
        entry_price: entry,
        instrument_token: Some(format!("T-{order_id}")),
        stop_loss_price: None,
        target_price: None,
        status: PositionStatus::Open,
        run_id: None,
        strategy: None,
        is_paper: false,
    }
}

#[derive(Default)]
pub struct FakeBroker {
    prices: Mutex<HashMap<String, Decimal>>,
    ltp_errors: Mutex<VecDeque<BrokerError>>,
    order_errors: Mutex<VecDeque<BrokerError>>,
    orders: Mutex<Vec<OrderRequest>>,
    order_delay: Mutex<Option<Duration>>,
    ltp_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl FakeBroker {
    pub fn set_price(&self, token: &str, price: Decimal) {
        self.prices.lock().insert(token.to_string(), price);
    }

    pub fn push_ltp_error(&self, e: BrokerError) {
        self.ltp_errors.lock().push_back(e);
    }

    pub fn push_order_error(&self, e: BrokerError) {
        self.order_errors.lock().push_back(e);
    }

    pub fn delay_orders(&self, delay: Duration) {
        *self.order_delay.lock() = Some(delay);
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().clone()
    }

    pub fn ltp_calls(&self) -> usize {
        self.ltp_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerGateway for FakeBroker {
    async fn place_order(
        &self,
        _session: &BrokerSession,
        order: &OrderRequest,
    ) -> Result<OrderAck, BrokerError> {
        let delay = *self.order_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = self.order_errors.lock().pop_front() {
            return Err(e);
        }
        let mut orders = self.orders.lock();
        orders.push(order.clone());
        let order_id = format!("OID-{}", orders.len());
        Ok(OrderAck {
            raw: serde_json::json!({ "orderid": order_id }),
            order_id,
        })
    }

    async fn get_ltp(
        &self,
        _session: &BrokerSession,
        _exchange: &str,
        trading_symbol: &str,
        instrument_token: &str,
    ) -> Result<Ltp, BrokerError> {
        self.ltp_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.ltp_errors.lock().pop_front() {
            return Err(e);
        }
        self.prices
            .lock()
            .get(instrument_token)
            .map(|p| Ltp {
                price: *p,
                open_interest: None,
            })
            .ok_or_else(|| BrokerError::Api {
                status: 404,
                message: format!("no price for {trading_symbol}"),
            })
    }

    async fn refresh_session(&self, session: &BrokerSession) -> Result<BrokerSession, BrokerError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(BrokerSession {
            access_token: format!("{}-refreshed", session.access_token),
            ..session.clone()
        })
    }
}

/// Instrument lookup backed by a fixed map.
#[derive(Default)]
pub struct FakeInstruments {
    tokens: Mutex<HashMap<String, String>>,
}

impl FakeInstruments {
    pub fn insert(&self, symbol: &str, token: &str) {
        self.tokens.lock().insert(symbol.to_string(), token.to_string());
    }
}

#[async_trait]
impl InstrumentRepository for FakeInstruments {
    async fn resolve_token(
        &self,
        exchange: &str,
        trading_symbol: &str,
    ) -> Result<String, CollaboratorError> {
        self.tokens
            .lock()
            .get(trading_symbol)
            .cloned()
            .ok_or_else(|| CollaboratorError::InstrumentNotFound {
                exchange: exchange.to_string(),
                trading_symbol: trading_symbol.to_string(),
            })
    }
}
