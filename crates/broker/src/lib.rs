//! Broker adapters for the index options engine.
//!
//! This crate provides:
//! - A SmartAPI-style REST client implementing `BrokerGateway`, with client-side
//!   rate limiting and per-request timeouts
//! - Explicit mapping functions from broker payloads to typed results
//! - A paper broker that simulates fills locally
//!
//! # Error mapping
//!
//! - HTTP 403/429 → `BrokerError::RateLimited`
//! - HTTP 401, error code `AG8001` or an "invalid token" message →
//!   `BrokerError::InvalidSession`
//! - Order refusals → `BrokerError::Rejected` with the full payload
//! - Client timeouts → `BrokerError::Timeout`

pub mod mapping;
pub mod paper;
pub mod smartapi;

pub use mapping::{map_ltp_response, map_order_response, map_refresh_response};
pub use paper::PaperBroker;
pub use smartapi::{SmartApiClient, SmartApiConfig, LTP_PATH, PLACE_ORDER_PATH, REFRESH_PATH};
