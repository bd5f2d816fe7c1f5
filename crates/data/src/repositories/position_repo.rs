//! Position repository.
//!
//! Exits are serialised with two conditional writes instead of locks: an exit
//! claim taken while the row is still OPEN, and the OPEN→CLOSED transition
//! bound to that claim. A write that matches zero rows means another actor
//! got there first.

use algo_options_core::Side;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::codec::{decimal, millis, opt_decimal, opt_from_millis, from_millis, quantity};
use crate::models::{AutoExit, AutoExitStatus, NewPosition, Position, PositionStatus};

const COLUMNS: &str = r"
    id, client_id, broker_order_id, trading_symbol, exchange, side, quantity,
    entry_price, instrument_token, stop_loss_price, target_price, status,
    exit_order_id, exit_price, exit_at, run_id, strategy, auto_exit_enabled,
    auto_exit_at, auto_exit_job_id, auto_exit_status, is_paper, created_at
";

/// Exit fields written together with the OPEN→CLOSED transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitFill {
    pub exit_order_id: Option<String>,
    pub exit_price: Decimal,
    pub exit_at: DateTime<Utc>,
}

/// Repository for position rows.
#[derive(Debug, Clone)]
pub struct PositionRepository {
    pool: SqlitePool,
}

impl PositionRepository {
    /// Creates a new repository instance.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new position and returns the generated ID.
    ///
    /// # Errors
    /// Returns an error if the database operation fails, including a
    /// duplicate broker order id.
    pub async fn insert(&self, position: &NewPosition) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r"
            INSERT INTO positions
                (client_id, broker_order_id, trading_symbol, exchange, side, quantity,
                 entry_price, instrument_token, stop_loss_price, target_price, status,
                 run_id, strategy, is_paper, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            RETURNING id
            ",
        )
        .bind(&position.client_id)
        .bind(&position.broker_order_id)
        .bind(&position.trading_symbol)
        .bind(&position.exchange)
        .bind(position.side.as_str())
        .bind(i64::from(position.quantity))
        .bind(position.entry_price.to_string())
        .bind(&position.instrument_token)
        .bind(position.stop_loss_price.map(|d| d.to_string()))
        .bind(position.target_price.map(|d| d.to_string()))
        .bind(position.status.as_str())
        .bind(position.run_id)
        .bind(&position.strategy)
        .bind(position.is_paper)
        .bind(millis(Utc::now()))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Gets a position by ID.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn get(&self, id: i64) -> Result<Option<Position>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM positions WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_position).transpose()
    }

    /// All OPEN positions, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM positions WHERE status = 'OPEN' ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_position).collect()
    }

    /// OPEN positions tagged with `run_id`.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn open_positions_for_run(&self, run_id: i64) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM positions WHERE status = 'OPEN' AND run_id = ?1 ORDER BY id ASC"
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_position).collect()
    }

    /// Every position of a run regardless of status.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn positions_for_run(&self, run_id: i64) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM positions WHERE run_id = ?1 ORDER BY id ASC"
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_position).collect()
    }

    /// OPEN positions whose auto-exit is still pending.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn pending_auto_exits(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM positions
             WHERE status = 'OPEN' AND auto_exit_enabled = 1 AND auto_exit_status = 'scheduled'
             ORDER BY auto_exit_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_position).collect()
    }

    /// Records a resolved instrument token on a position that had none.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn set_instrument_token(&self, id: i64, token: &str) -> Result<()> {
        sqlx::query(
            "UPDATE positions SET instrument_token = ?2 WHERE id = ?1 AND instrument_token IS NULL",
        )
        .bind(id)
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Takes the exit claim on an OPEN position.
    ///
    /// Claims older than `stale_before` are treated as abandoned and can be
    /// taken over. Returns `false` when the position is not OPEN or another
    /// actor holds a live claim.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn claim_exit(
        &self,
        id: i64,
        claim: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE positions
            SET exit_claim = ?2, exit_claimed_at = ?3
            WHERE id = ?1
              AND status = 'OPEN'
              AND (exit_claim IS NULL OR exit_claimed_at < ?4)
            ",
        )
        .bind(id)
        .bind(claim)
        .bind(millis(now))
        .bind(millis(stale_before))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Drops a claim after a failed exit so the next cycle can retry.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn release_exit_claim(&self, id: i64, claim: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE positions
            SET exit_claim = NULL, exit_claimed_at = NULL
            WHERE id = ?1 AND exit_claim = ?2
            ",
        )
        .bind(id)
        .bind(claim)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// OPEN→CLOSED under `claim`, writing the exit fields atomically.
    ///
    /// Returns `false` when the row was no longer OPEN under this claim.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn close(&self, id: i64, claim: &str, fill: &ExitFill) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE positions
            SET status = 'CLOSED',
                exit_order_id = ?3,
                exit_price = ?4,
                exit_at = ?5,
                exit_claim = NULL,
                exit_claimed_at = NULL
            WHERE id = ?1 AND status = 'OPEN' AND exit_claim = ?2
            ",
        )
        .bind(id)
        .bind(claim)
        .bind(&fill.exit_order_id)
        .bind(fill.exit_price.to_string())
        .bind(millis(fill.exit_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Writes all auto-exit fields.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn set_auto_exit(&self, id: i64, auto_exit: &AutoExit) -> Result<()> {
        sqlx::query(
            r"
            UPDATE positions
            SET auto_exit_enabled = ?2, auto_exit_at = ?3, auto_exit_job_id = ?4, auto_exit_status = ?5
            WHERE id = ?1
            ",
        )
        .bind(id)
        .bind(auto_exit.enabled)
        .bind(auto_exit.scheduled_at.map(millis))
        .bind(&auto_exit.job_id)
        .bind(auto_exit.status.map(|s| s.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Moves a scheduled auto-exit to `status`. Returns whether one was pending.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn finish_auto_exit(&self, id: i64, status: AutoExitStatus) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE positions
            SET auto_exit_status = ?2
            WHERE id = ?1 AND auto_exit_status = 'scheduled'
            ",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn map_position(row: &SqliteRow) -> Result<Position> {
    let side: String = row.try_get("side")?;
    let status: String = row.try_get("status")?;
    let entry_price: String = row.try_get("entry_price")?;
    let auto_exit_status: Option<String> = row.try_get("auto_exit_status")?;

    Ok(Position {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        broker_order_id: row.try_get("broker_order_id")?,
        trading_symbol: row.try_get("trading_symbol")?,
        exchange: row.try_get("exchange")?,
        side: Side::parse(&side).ok_or_else(|| anyhow!("unknown side '{side}'"))?,
        quantity: quantity(row.try_get("quantity")?)?,
        entry_price: decimal(&entry_price)?,
        instrument_token: row.try_get("instrument_token")?,
        stop_loss_price: opt_decimal(row.try_get("stop_loss_price")?)?,
        target_price: opt_decimal(row.try_get("target_price")?)?,
        status: PositionStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown position status '{status}'"))?,
        exit_order_id: row.try_get("exit_order_id")?,
        exit_price: opt_decimal(row.try_get("exit_price")?)?,
        exit_at: opt_from_millis(row.try_get("exit_at")?)?,
        run_id: row.try_get("run_id")?,
        strategy: row.try_get("strategy")?,
        auto_exit: AutoExit {
            enabled: row.try_get("auto_exit_enabled")?,
            scheduled_at: opt_from_millis(row.try_get("auto_exit_at")?)?,
            job_id: row.try_get("auto_exit_job_id")?,
            status: auto_exit_status.as_deref().and_then(AutoExitStatus::parse),
        },
        is_paper: row.try_get("is_paper")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn new_position(order_id: &str) -> NewPosition {
        NewPosition {
            client_id: "C1".to_string(),
            broker_order_id: order_id.to_string(),
            trading_symbol: "NIFTY24OCT24500CE".to_string(),
            exchange: "NFO".to_string(),
            side: Side::Sell,
            quantity: 75,
            entry_price: dec!(120.5),
            instrument_token: None,
            stop_loss_price: Some(dec!(156.65)),
            target_price: None,
            status: PositionStatus::Open,
            run_id: None,
            strategy: Some("short_straddle".to_string()),
            is_paper: false,
        }
    }

    #[tokio::test]
    async fn insert_and_read_back() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.repositories().positions;

        let id = repo.insert(&new_position("OID-1")).await.unwrap();
        let pos = repo.get(id).await.unwrap().expect("stored");

        assert_eq!(pos.entry_price, dec!(120.5));
        assert_eq!(pos.stop_loss_price, Some(dec!(156.65)));
        assert_eq!(pos.side, Side::Sell);
        assert_eq!(pos.status, PositionStatus::Open);
        assert!(pos.exit_at.is_none());
    }

    #[tokio::test]
    async fn broker_order_id_is_unique() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.repositories().positions;

        repo.insert(&new_position("OID-1")).await.unwrap();
        assert!(repo.insert(&new_position("OID-1")).await.is_err());
    }

    #[tokio::test]
    async fn only_one_claim_wins() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.repositories().positions;
        let id = repo.insert(&new_position("OID-1")).await.unwrap();
        let now = Utc::now();
        let stale = now - Duration::seconds(60);

        assert!(repo.claim_exit(id, "a", now, stale).await.unwrap());
        assert!(!repo.claim_exit(id, "b", now, stale).await.unwrap());

        // abandoned claims can be taken over
        let later = now + Duration::seconds(120);
        assert!(repo
            .claim_exit(id, "b", later, later - Duration::seconds(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn close_requires_matching_claim_and_happens_once() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.repositories().positions;
        let id = repo.insert(&new_position("OID-1")).await.unwrap();
        let now = Utc::now();
        let fill = ExitFill {
            exit_order_id: Some("EXIT-1".to_string()),
            exit_price: dec!(101),
            exit_at: now,
        };

        assert!(repo.claim_exit(id, "a", now, now).await.unwrap());
        assert!(!repo.close(id, "b", &fill).await.unwrap());
        assert!(repo.close(id, "a", &fill).await.unwrap());
        assert!(!repo.close(id, "a", &fill).await.unwrap());

        let pos = repo.get(id).await.unwrap().unwrap();
        assert_eq!(pos.status, PositionStatus::Closed);
        assert_eq!(pos.exit_order_id.as_deref(), Some("EXIT-1"));
        assert_eq!(pos.exit_price, Some(dec!(101)));
        assert!(repo.open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn released_claim_can_be_retaken() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.repositories().positions;
        let id = repo.insert(&new_position("OID-1")).await.unwrap();
        let now = Utc::now();
        let stale = now - Duration::seconds(60);

        assert!(repo.claim_exit(id, "a", now, stale).await.unwrap());
        repo.release_exit_claim(id, "a").await.unwrap();
        assert!(repo.claim_exit(id, "b", now, stale).await.unwrap());
    }

    #[tokio::test]
    async fn auto_exit_fields_round_trip() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.repositories().positions;
        let id = repo.insert(&new_position("OID-1")).await.unwrap();
        let at = DateTime::<Utc>::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();

        repo.set_auto_exit(
            id,
            &AutoExit {
                enabled: true,
                scheduled_at: Some(at),
                job_id: Some(format!("auto-exit-{id}")),
                status: Some(AutoExitStatus::Scheduled),
            },
        )
        .await
        .unwrap();

        assert_eq!(repo.pending_auto_exits().await.unwrap().len(), 1);
        assert!(repo.finish_auto_exit(id, AutoExitStatus::Cancelled).await.unwrap());
        assert!(!repo.finish_auto_exit(id, AutoExitStatus::Executed).await.unwrap());

        let pos = repo.get(id).await.unwrap().unwrap();
        assert_eq!(pos.auto_exit.scheduled_at, Some(at));
        assert_eq!(pos.auto_exit.status, Some(AutoExitStatus::Cancelled));
    }

    #[tokio::test]
    async fn instrument_token_is_only_filled_once() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.repositories().positions;
        let id = repo.insert(&new_position("OID-1")).await.unwrap();

        repo.set_instrument_token(id, "43210").await.unwrap();
        repo.set_instrument_token(id, "99999").await.unwrap();

        let pos = repo.get(id).await.unwrap().unwrap();
        assert_eq!(pos.instrument_token.as_deref(), Some("43210"));
    }
}
