//! Throttled last-traded-price cache.
//!
//! Quotes younger than the minimum fetch interval are served from memory.
//! Otherwise the client's stored session is used to ask the broker; an
//! expired token is refreshed and persisted once before a single retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use algo_options_core::{BrokerGateway, BrokerSession, Clock, Ltp};
use algo_options_data::{Position, SessionRepository};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::error::QuoteError;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    ltp: Ltp,
    fetched_at: DateTime<Utc>,
}

/// Process-local quote cache keyed by instrument token.
pub struct QuoteCache {
    broker: Arc<dyn BrokerGateway>,
    sessions: SessionRepository,
    clock: Arc<dyn Clock>,
    min_fetch_interval: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl std::fmt::Debug for QuoteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteCache")
            .field("min_fetch_interval", &self.min_fetch_interval)
            .field("entries", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}

impl QuoteCache {
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerGateway>,
        sessions: SessionRepository,
        clock: Arc<dyn Clock>,
        min_fetch_interval: Duration,
    ) -> Self {
        Self {
            broker,
            sessions,
            clock,
            min_fetch_interval,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Last traded price for `instrument_token`, fetched through `client_id`'s
    /// session when the cached value is stale.
    ///
    /// # Errors
    /// `NoSession` when the client has no stored session, `RateLimited` when
    /// the broker throttles, `Broker` for any other broker failure after at
    /// most one session refresh.
    pub async fn get_quote(
        &self,
        client_id: &str,
        exchange: &str,
        trading_symbol: &str,
        instrument_token: &str,
    ) -> Result<Ltp, QuoteError> {
        if let Some(ltp) = self.fresh(instrument_token) {
            debug!(token = instrument_token, "quote served from cache");
            return Ok(ltp);
        }

        let session = self
            .sessions
            .get(client_id)
            .await?
            .ok_or_else(|| QuoteError::NoSession(client_id.to_string()))?;

        let ltp = match self
            .broker
            .get_ltp(&session, exchange, trading_symbol, instrument_token)
            .await
        {
            Ok(ltp) => ltp,
            Err(e) if e.is_rate_limited() => return Err(QuoteError::RateLimited),
            Err(e) if e.is_invalid_session() => {
                info!(client_id, error = %e, "broker session expired, refreshing");
                let refreshed = self.refresh(&session).await?;
                self.broker
                    .get_ltp(&refreshed, exchange, trading_symbol, instrument_token)
                    .await
                    .map_err(|e| {
                        if e.is_rate_limited() {
                            QuoteError::RateLimited
                        } else {
                            QuoteError::Broker(e)
                        }
                    })?
            }
            Err(e) => return Err(QuoteError::Broker(e)),
        };

        self.entries.write().insert(
            instrument_token.to_string(),
            CacheEntry {
                ltp,
                fetched_at: self.clock.now(),
            },
        );
        Ok(ltp)
    }

    /// Best-effort mark for an exit price. Paper legs and legs without an
    /// instrument token are never quoted; failures are logged and yield `None`.
    pub async fn price_for(&self, pos: &Position) -> Option<Decimal> {
        if pos.is_paper {
            return None;
        }
        let token = pos.instrument_token.as_deref()?;
        match self
            .get_quote(&pos.client_id, &pos.exchange, &pos.trading_symbol, token)
            .await
        {
            Ok(q) => Some(q.price),
            Err(e) => {
                warn!(position_id = pos.id, error = %e, "no quote, exit price unknown");
                None
            }
        }
    }

    /// Stored session for `client_id`, if any.
    ///
    /// # Errors
    /// Returns a store error if the lookup fails.
    pub async fn session(&self, client_id: &str) -> Result<Option<BrokerSession>, QuoteError> {
        Ok(self.sessions.get(client_id).await?)
    }

    /// Drops every cached quote.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn fresh(&self, instrument_token: &str) -> Option<Ltp> {
        let entry = *self.entries.read().get(instrument_token)?;
        let age = self.clock.now().signed_duration_since(entry.fetched_at);
        let max_age = chrono::Duration::from_std(self.min_fetch_interval).ok()?;
        (age >= chrono::Duration::zero() && age < max_age).then_some(entry.ltp)
    }

    async fn refresh(&self, session: &BrokerSession) -> Result<BrokerSession, QuoteError> {
        let refreshed = match self.broker.refresh_session(session).await {
            Ok(s) => s,
            Err(e) => {
                warn!(client_id = %session.client_id, error = %e, "session refresh failed");
                return Err(if e.is_rate_limited() {
                    QuoteError::RateLimited
                } else {
                    QuoteError::Broker(e)
                });
            }
        };
        self.sessions.upsert(&refreshed).await?;
        Ok(refreshed)
    }
}
