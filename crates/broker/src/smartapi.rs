//! SmartAPI-style REST client with rate limiting.
//!
//! Implements [`BrokerGateway`] over the broker's JSON endpoints. Requests are
//! throttled client-side with `governor` and carry a per-request timeout;
//! payload interpretation lives in [`crate::mapping`].

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use algo_options_core::{
    BrokerConfig, BrokerError, BrokerGateway, BrokerSession, Ltp, OrderAck, OrderRequest,
    OrderType,
};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::mapping::{map_ltp_response, map_order_response, map_refresh_response};

pub const PLACE_ORDER_PATH: &str = "/rest/secure/angelbroking/order/v1/placeOrder";
pub const LTP_PATH: &str = "/rest/secure/angelbroking/order/v1/getLtpData";
pub const REFRESH_PATH: &str = "/rest/auth/angelbroking/jwt/v1/generateTokens";

/// Configuration for the SmartAPI client.
#[derive(Debug, Clone)]
pub struct SmartApiConfig {
    pub base_url: String,
    /// Application key sent as `X-PrivateKey`.
    pub api_key: String,
    pub requests_per_second: NonZeroU32,
    pub timeout: Duration,
    /// Product type stamped on orders that do not set one.
    pub default_product_type: String,
}

impl Default for SmartApiConfig {
    fn default() -> Self {
        Self::from(&BrokerConfig::default())
    }
}

impl From<&BrokerConfig> for SmartApiConfig {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            requests_per_second: NonZeroU32::new(config.requests_per_second)
                .unwrap_or(nonzero!(10u32)),
            timeout: config.timeout(),
            default_product_type: config.product_type.clone(),
        }
    }
}

impl SmartApiConfig {
    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct PlaceOrderBody<'a> {
    variety: &'static str,
    tradingsymbol: &'a str,
    symboltoken: &'a str,
    transactiontype: &'static str,
    exchange: &'a str,
    ordertype: &'static str,
    producttype: &'a str,
    duration: &'static str,
    price: String,
    quantity: String,
}

#[derive(Debug, Serialize)]
struct LtpBody<'a> {
    exchange: &'a str,
    tradingsymbol: &'a str,
    symboltoken: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// SmartAPI REST client.
pub struct SmartApiClient {
    config: SmartApiConfig,
    http: Client,
    rate_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for SmartApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartApiClient")
            .field("base_url", &self.config.base_url)
            .field("requests_per_second", &self.config.requests_per_second)
            .finish_non_exhaustive()
    }
}

impl SmartApiClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: SmartApiConfig) -> Result<Self, BrokerError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BrokerError::Network(format!("failed to build HTTP client: {e}")))?;

        let quota = Quota::per_second(config.requests_per_second);
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            config,
            http,
            rate_limiter,
        })
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Waits for the rate limiter and POSTs `body`, returning HTTP status and
    /// JSON body. Non-JSON bodies are wrapped as a JSON string.
    async fn post<B: Serialize + Sync>(
        &self,
        path: &str,
        access_token: &str,
        body: &B,
    ) -> Result<(u16, Value), BrokerError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.config.base_url, path);
        debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {access_token}"))
            .header("X-PrivateKey", &self.config.api_key)
            .header("X-UserType", "USER")
            .header("X-SourceID", "WEB")
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport_error)?;
        let value = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok((status, value))
    }
}

fn transport_error(e: reqwest::Error) -> BrokerError {
    if e.is_timeout() {
        BrokerError::Timeout(e.to_string())
    } else {
        BrokerError::Network(e.to_string())
    }
}

#[async_trait]
impl BrokerGateway for SmartApiClient {
    async fn place_order(
        &self,
        session: &BrokerSession,
        order: &OrderRequest,
    ) -> Result<OrderAck, BrokerError> {
        let (ordertype, price) = match order.order_type {
            OrderType::Market => ("MARKET", "0".to_string()),
            OrderType::Limit { price } => ("LIMIT", price.to_string()),
        };
        let body = PlaceOrderBody {
            variety: "NORMAL",
            tradingsymbol: &order.trading_symbol,
            symboltoken: order.instrument_token.as_deref().unwrap_or_default(),
            transactiontype: order.side.as_str(),
            exchange: &order.exchange,
            ordertype,
            producttype: order
                .product_type
                .as_deref()
                .unwrap_or(&self.config.default_product_type),
            duration: "DAY",
            price,
            quantity: order.quantity.to_string(),
        };

        let (status, value) = self.post(PLACE_ORDER_PATH, &session.access_token, &body).await?;
        let result = map_order_response(status, &value);
        if let Err(e) = &result {
            warn!(
                client_id = %session.client_id,
                symbol = %order.trading_symbol,
                error = %e,
                payload = %value,
                "order not accepted"
            );
        }
        result
    }

    async fn get_ltp(
        &self,
        session: &BrokerSession,
        exchange: &str,
        trading_symbol: &str,
        instrument_token: &str,
    ) -> Result<Ltp, BrokerError> {
        let body = LtpBody {
            exchange,
            tradingsymbol: trading_symbol,
            symboltoken: instrument_token,
        };
        let (status, value) = self.post(LTP_PATH, &session.access_token, &body).await?;
        map_ltp_response(status, &value)
    }

    async fn refresh_session(&self, session: &BrokerSession) -> Result<BrokerSession, BrokerError> {
        let refresh_token = session
            .refresh_token
            .as_deref()
            .ok_or_else(|| BrokerError::RefreshFailed("no refresh token stored".to_string()))?;

        let body = RefreshBody { refresh_token };
        let (status, value) = self.post(REFRESH_PATH, &session.access_token, &body).await?;
        map_refresh_response(&session.client_id, session, status, &value)
    }
}
