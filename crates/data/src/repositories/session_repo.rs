//! Broker session store, keyed by broker client id.

use algo_options_core::BrokerSession;
use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::codec::millis;

#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    /// Creates a new repository instance.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stored session for `client_id`, if any.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get(&self, client_id: &str) -> Result<Option<BrokerSession>> {
        let row = sqlx::query(
            r"
            SELECT client_id, access_token, refresh_token, feed_token
            FROM broker_sessions
            WHERE client_id = ?1
            ",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(BrokerSession {
                client_id: r.try_get("client_id")?,
                access_token: r.try_get("access_token")?,
                refresh_token: r.try_get("refresh_token")?,
                feed_token: r.try_get("feed_token")?,
            })
        })
        .transpose()
    }

    /// Inserts or replaces the session for its client id.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn upsert(&self, session: &BrokerSession) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO broker_sessions (client_id, access_token, refresh_token, feed_token, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (client_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                feed_token = excluded.feed_token,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&session.client_id)
        .bind(&session.access_token)
        .bind(&session.refresh_token)
        .bind(&session.feed_token)
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
