//! Error types at the collaborator boundaries.
//!
//! Broker adapters map every transport or payload failure into
//! [`BrokerError`]; callers only ever branch on the variants here.

use thiserror::Error;

/// Broker error code some REST brokers return for an expired JWT.
pub const INVALID_TOKEN_CODE: &str = "AG8001";

/// Errors returned by a [`crate::BrokerGateway`].
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Access token expired or revoked.
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// HTTP 403/429 from the broker.
    #[error("rate limited by broker (HTTP {status})")]
    RateLimited {
        /// HTTP status code.
        status: u16,
    },

    /// Broker answered but refused the order.
    #[error("order rejected: {message}")]
    Rejected {
        /// Broker message.
        message: String,
        /// Full broker payload when one was returned.
        raw: Option<serde_json::Value>,
    },

    /// The refresh token itself is no longer valid; re-login required.
    #[error("session refresh failed: {0}")]
    RefreshFailed(String),

    /// Client-side timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Any other non-success answer.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from API.
        message: String,
    },

    /// Payload did not have the expected shape.
    #[error("malformed broker response: {0}")]
    Malformed(String),
}

impl BrokerError {
    /// Creates a rejection error carrying the raw payload.
    pub fn rejected(message: impl Into<String>, raw: Option<serde_json::Value>) -> Self {
        Self::Rejected {
            message: message.into(),
            raw,
        }
    }

    /// Returns true for failures worth retrying later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) | Self::RateLimited { .. } => true,
            Self::InvalidSession(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true when the access token should be refreshed.
    #[must_use]
    pub fn is_invalid_session(&self) -> bool {
        match self {
            Self::InvalidSession(_) => true,
            Self::Api { message, .. } | Self::Rejected { message, .. } => {
                message.contains(INVALID_TOKEN_CODE)
                    || message.to_lowercase().contains("invalid token")
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Errors from the instrument, strategy and user collaborators.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("instrument not found: {exchange}:{trading_symbol}")]
    InstrumentNotFound {
        exchange: String,
        trading_symbol: String,
    },

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("no strikes available for {symbol} expiring {expiry}")]
    NoStrikesAvailable { symbol: String, expiry: String },

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}
