//! Leg placement audit repository.

use algo_options_core::{OptionType, Side};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::codec::{decimal, from_millis, millis, quantity};
use crate::models::{AlgoTrade, NewTrade, TradeMode, TradeStatus};

/// Repository for the write-once `algo_trades` table.
#[derive(Debug, Clone)]
pub struct TradeRepository {
    pool: SqlitePool,
}

impl TradeRepository {
    /// Creates a new repository instance.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends an audit record.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn insert(&self, trade: &NewTrade) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r"
            INSERT INTO algo_trades
                (run_id, batch_id, user_id, client_id, order_id, trading_symbol, option_type,
                 strike, side, quantity, mode, status, error, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            RETURNING id
            ",
        )
        .bind(trade.run_id)
        .bind(&trade.batch_id)
        .bind(&trade.user_id)
        .bind(&trade.client_id)
        .bind(&trade.order_id)
        .bind(&trade.trading_symbol)
        .bind(trade.option_type.as_str())
        .bind(trade.strike.to_string())
        .bind(trade.side.as_str())
        .bind(i64::from(trade.quantity))
        .bind(trade.mode.as_str())
        .bind(trade.status.as_str())
        .bind(&trade.error)
        .bind(millis(trade.created_at))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Number of distinct batches of `run_id` with at least one successful
    /// leg recorded at or after `since`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_batches_since(&self, run_id: i64, since: DateTime<Utc>) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(DISTINCT batch_id)
            FROM algo_trades
            WHERE run_id = ?1 AND status = 'ok' AND created_at >= ?2
            ",
        )
        .bind(run_id)
        .bind(millis(since))
        .fetch_one(&self.pool)
        .await?;

        Ok(quantity(count)?)
    }

    /// All audit records of a run, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn for_run(&self, run_id: i64) -> Result<Vec<AlgoTrade>> {
        let rows = sqlx::query(
            r"
            SELECT id, run_id, batch_id, user_id, client_id, order_id, trading_symbol,
                   option_type, strike, side, quantity, mode, status, error, created_at
            FROM algo_trades
            WHERE run_id = ?1
            ORDER BY id ASC
            ",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_trade).collect()
    }
}

fn map_trade(row: &SqliteRow) -> Result<AlgoTrade> {
    let option_type: String = row.try_get("option_type")?;
    let side: String = row.try_get("side")?;
    let mode: String = row.try_get("mode")?;
    let status: String = row.try_get("status")?;
    let strike: String = row.try_get("strike")?;

    Ok(AlgoTrade {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        batch_id: row.try_get("batch_id")?,
        user_id: row.try_get("user_id")?,
        client_id: row.try_get("client_id")?,
        order_id: row.try_get("order_id")?,
        trading_symbol: row.try_get("trading_symbol")?,
        option_type: OptionType::parse(&option_type)
            .ok_or_else(|| anyhow!("unknown option type '{option_type}'"))?,
        strike: decimal(&strike)?,
        side: Side::parse(&side).ok_or_else(|| anyhow!("unknown side '{side}'"))?,
        quantity: quantity(row.try_get("quantity")?)?,
        mode: TradeMode::parse(&mode).ok_or_else(|| anyhow!("unknown trade mode '{mode}'"))?,
        status: TradeStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown trade status '{status}'"))?,
        error: row.try_get("error")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewRun;
    use crate::Database;
    use algo_options_core::RiskParams;
    use chrono::{Duration, NaiveDate};
    use rust_decimal_macros::dec;

    async fn setup() -> (Database, i64) {
        let db = Database::in_memory().await.unwrap();
        let run = db
            .repositories()
            .runs
            .try_insert_running(
                &NewRun {
                    symbol: "NIFTY".to_string(),
                    expiry: NaiveDate::from_ymd_opt(2026, 10, 29).unwrap(),
                    strategy: "short_straddle".to_string(),
                    created_by: "admin".to_string(),
                    risk: RiskParams::default(),
                },
                Utc::now(),
            )
            .await
            .unwrap()
            .unwrap();
        (db, run.id)
    }

    fn trade(run_id: i64, batch: &str, status: TradeStatus, at: DateTime<Utc>) -> NewTrade {
        NewTrade {
            run_id,
            batch_id: batch.to_string(),
            user_id: "u1".to_string(),
            client_id: "C1".to_string(),
            order_id: (status == TradeStatus::Ok).then(|| format!("OID-{batch}")),
            trading_symbol: "NIFTY29OCT2625000CE".to_string(),
            option_type: OptionType::Call,
            strike: dec!(25000),
            side: Side::Sell,
            quantity: 75,
            mode: TradeMode::Live,
            status,
            error: (status == TradeStatus::Error).then(|| "rejected".to_string()),
            created_at: at,
        }
    }

    #[tokio::test]
    async fn counts_distinct_successful_batches_since_cutoff() {
        let (db, run_id) = setup().await;
        let repo = db.repositories().trades;
        let now = Utc::now();
        let yesterday = now - Duration::days(1);

        // two legs of one batch count once
        repo.insert(&trade(run_id, "b1", TradeStatus::Ok, now)).await.unwrap();
        repo.insert(&trade(run_id, "b1", TradeStatus::Ok, now)).await.unwrap();
        // a batch where every leg failed does not count
        repo.insert(&trade(run_id, "b2", TradeStatus::Error, now)).await.unwrap();
        // earlier days do not count
        repo.insert(&trade(run_id, "b0", TradeStatus::Ok, yesterday)).await.unwrap();

        let since = now - Duration::hours(1);
        assert_eq!(repo.count_batches_since(run_id, since).await.unwrap(), 1);
        assert_eq!(repo.for_run(run_id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn audit_record_round_trips() {
        let (db, run_id) = setup().await;
        let repo = db.repositories().trades;
        let at = DateTime::<Utc>::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();

        repo.insert(&trade(run_id, "b1", TradeStatus::Error, at)).await.unwrap();
        let stored = repo.for_run(run_id).await.unwrap().remove(0);

        assert_eq!(stored.status, TradeStatus::Error);
        assert_eq!(stored.error.as_deref(), Some("rejected"));
        assert_eq!(stored.option_type, OptionType::Call);
        assert_eq!(stored.strike, dec!(25000));
        assert_eq!(stored.created_at, at);
        assert!(stored.order_id.is_none());
    }
}
