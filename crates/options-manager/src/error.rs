//! Error types for the position-lifecycle components.

use algo_options_core::BrokerError;
use thiserror::Error;

/// Errors from [`crate::QuoteCache`].
#[derive(Debug, Error)]
pub enum QuoteError {
    /// No broker session stored for the client.
    #[error("no broker session for client {0}")]
    NoSession(String),

    /// Broker throttled the request; skip this cycle.
    #[error("quote request rate limited")]
    RateLimited,

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl QuoteError {
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// Errors from [`crate::ExitExecutor`]. The position stays OPEN.
#[derive(Debug, Error)]
pub enum ExitError {
    /// Broker did not accept the square-off order.
    #[error("exit order failed: {0}")]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ExitError {
    /// Whether a later attempt may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Broker(e) => e.is_transient(),
            Self::Store(_) => true,
        }
    }
}

/// Outcome of a job attempt, as reported by a [`crate::JobHandler`].
#[derive(Debug, Error)]
pub enum JobError {
    /// Retried with backoff.
    #[error("transient job failure: {0}")]
    Transient(String),

    /// Not retried.
    #[error("permanent job failure: {0}")]
    Permanent(String),
}

impl JobError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors from [`crate::AutoExitScheduler`].
#[derive(Debug, Error)]
pub enum AutoExitError {
    #[error("position {0} not found")]
    PositionNotFound(i64),

    #[error("position {0} is not open")]
    NotOpen(i64),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
