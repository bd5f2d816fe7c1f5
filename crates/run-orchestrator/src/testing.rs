//! Test harness: in-memory store, fake broker and fixed collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use algo_options_core::{
    BrokerError, BrokerGateway, BrokerSession, CollaboratorError, Leg, LicenceMode, Ltp,
    ManualClock, OptionType, OrderAck, OrderRequest, RiskParams, RunConfig, Side,
    StrategyResolver, TradingUser, UserDirectory,
};
use algo_options_data::{Database, Repositories};
use algo_options_manager::{
    ExitExecutor, ExitSettings, InMemoryJobScheduler, QuoteCache, RetryPolicy, RiskEnforcer,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::controller::{ControllerSettings, RunController, RunServices};

/// Price every instrument trades at unless a test moves it.
pub const PRICE: Decimal = dec!(100);

pub struct FakeBroker {
    price: Mutex<Decimal>,
    token_prices: Mutex<HashMap<String, Decimal>>,
    order_errors: Mutex<VecDeque<BrokerError>>,
    orders: Mutex<Vec<OrderRequest>>,
}

impl Default for FakeBroker {
    fn default() -> Self {
        Self {
            price: Mutex::new(PRICE),
            token_prices: Mutex::new(HashMap::new()),
            order_errors: Mutex::new(VecDeque::new()),
            orders: Mutex::new(Vec::new()),
        }
    }
}

impl FakeBroker {
    pub fn set_all_prices(&self, price: Decimal) {
        *self.price.lock() = price;
    }

    /// Overrides the shared price for one instrument.
    pub fn set_price(&self, instrument_token: &str, price: Decimal) {
        self.token_prices
            .lock()
            .insert(instrument_token.to_string(), price);
    }

    pub fn push_order_error(&self, e: BrokerError) {
        self.order_errors.lock().push_back(e);
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().clone()
    }
}

#[async_trait]
impl BrokerGateway for FakeBroker {
    async fn place_order(
        &self,
        _session: &BrokerSession,
        order: &OrderRequest,
    ) -> Result<OrderAck, BrokerError> {
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
        _trading_symbol: &str,
        instrument_token: &str,
    ) -> Result<Ltp, BrokerError> {
        let price = self
            .token_prices
            .lock()
            .get(instrument_token)
            .copied()
            .unwrap_or_else(|| *self.price.lock());
        Ok(Ltp {
            price,
            open_interest: None,
        })
    }

    async fn refresh_session(&self, session: &BrokerSession) -> Result<BrokerSession, BrokerError> {
        Ok(session.clone())
    }
}

/// Short straddle at a fixed strike: one SELL call and one SELL put.
pub struct FixedStraddle;

#[async_trait]
impl StrategyResolver for FixedStraddle {
    async fn resolve_legs(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        strategy: &str,
        lot_size: u32,
    ) -> Result<Vec<Leg>, CollaboratorError> {
        if strategy != "short_straddle" {
            return Err(CollaboratorError::UnknownStrategy(strategy.to_string()));
        }
        let leg = |option_type: OptionType, token: &str| Leg {
            side: Side::Sell,
            option_type,
            exchange: "NFO".to_string(),
            trading_symbol: format!("{symbol}27OCT2625000{}", option_type.as_str()),
            strike: dec!(25000),
            instrument_token: token.to_string(),
            quantity: lot_size,
            expiry,
        };
        Ok(vec![leg(OptionType::Call, "CE-1"), leg(OptionType::Put, "PE-1")])
    }
}

#[derive(Default)]
pub struct FakeUsers {
    users: Mutex<Vec<TradingUser>>,
}

#[async_trait]
impl UserDirectory for FakeUsers {
    async fn trading_users(&self) -> anyhow::Result<Vec<TradingUser>> {
        Ok(self.users.lock().clone())
    }
}

pub struct Harness {
    pub repos: Repositories,
    pub broker: Arc<FakeBroker>,
    pub users: Arc<FakeUsers>,
    pub clock: Arc<ManualClock>,
    pub quotes: Arc<QuoteCache>,
    pub controller: Arc<RunController>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(RunConfig::default()).await
    }

    pub async fn with_risk(risk: RiskParams) -> Self {
        Self::build(RunConfig {
            risk,
            ..RunConfig::default()
        })
        .await
    }

    pub async fn with_interval(secs: u64) -> Self {
        Self::build(RunConfig {
            interval_secs: secs,
            ..RunConfig::default()
        })
        .await
    }

    async fn build(run: RunConfig) -> Self {
        let db = Database::in_memory().await.unwrap();
        let repos = db.repositories();
        let broker = Arc::new(FakeBroker::default());
        let users = Arc::new(FakeUsers::default());
        // 09:30 IST
        let clock = Arc::new(ManualClock::new(
            DateTime::parse_from_rfc3339("2026-10-19T04:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        ));
        let quotes = Arc::new(QuoteCache::new(
            broker.clone(),
            repos.sessions.clone(),
            clock.clone(),
            Duration::from_millis(1500),
        ));
        let exits = Arc::new(ExitExecutor::new(
            repos.positions.clone(),
            repos.sessions.clone(),
            broker.clone(),
            Arc::new(InMemoryJobScheduler::new(RetryPolicy::default())),
            clock.clone(),
            ExitSettings::default(),
        ));
        let risk = Arc::new(RiskEnforcer::new(
            repos.positions.clone(),
            quotes.clone(),
            exits.clone(),
        ));
        let controller = RunController::new(
            RunServices {
                repos: repos.clone(),
                broker: broker.clone(),
                strategies: Arc::new(FixedStraddle),
                users: users.clone(),
                quotes: quotes.clone(),
                exits,
                risk,
                clock: clock.clone(),
            },
            ControllerSettings::from_config(&run, Some("INTRADAY".to_string())).unwrap(),
        );
        Self {
            repos,
            broker,
            users,
            clock,
            quotes,
            controller,
        }
    }

    pub async fn add_user(&self, user_id: &str, client_id: &str, licence: LicenceMode, with_session: bool) {
        self.users.users.lock().push(TradingUser {
            user_id: user_id.to_string(),
            client_id: client_id.to_string(),
            active: true,
            trading_enabled: true,
            licence,
        });
        if with_session {
            self.repos
                .sessions
                .upsert(&BrokerSession {
                    client_id: client_id.to_string(),
                    access_token: format!("jwt-{client_id}"),
                    refresh_token: None,
                    feed_token: None,
                })
                .await
                .unwrap();
        }
    }
}
