//! Strategy run repository.

use algo_options_core::RiskParams;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::codec::{decimal, from_millis, millis, opt_from_millis, quantity};
use crate::models::{AlgoRun, NewRun, RunStatus, StopReason};

const COLUMNS: &str = r"
    id, symbol, expiry, strategy, status, created_by, started_at, stopped_at,
    stop_reason, max_trades_per_day, max_loss_percent, stop_loss_percent, target_percent
";

/// Repository for the `algo_runs` table.
#[derive(Debug, Clone)]
pub struct RunRepository {
    pool: SqlitePool,
}

impl RunRepository {
    /// Creates a new repository instance.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a run in state `running`.
    ///
    /// Returns `None` when another run is already running; the partial unique
    /// index on `status` makes this race-free across processes.
    ///
    /// # Errors
    /// Returns an error for any database failure other than that conflict.
    pub async fn try_insert_running(
        &self,
        run: &NewRun,
        started_at: DateTime<Utc>,
    ) -> Result<Option<AlgoRun>> {
        let inserted = sqlx::query(
            r"
            INSERT INTO algo_runs
                (symbol, expiry, strategy, status, created_by, started_at,
                 max_trades_per_day, max_loss_percent, stop_loss_percent, target_percent)
            VALUES (?1, ?2, ?3, 'running', ?4, ?5, ?6, ?7, ?8, ?9)
            RETURNING id
            ",
        )
        .bind(&run.symbol)
        .bind(run.expiry.to_string())
        .bind(&run.strategy)
        .bind(&run.created_by)
        .bind(millis(started_at))
        .bind(i64::from(run.risk.max_trades_per_day))
        .bind(run.risk.max_loss_percent.to_string())
        .bind(run.risk.stop_loss_percent.to_string())
        .bind(run.risk.target_percent.to_string())
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => {
                let id: i64 = row.try_get("id")?;
                self.get(id)
                    .await?
                    .map(Some)
                    .ok_or_else(|| anyhow!("run {id} vanished after insert"))
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Gets a run by ID.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn get(&self, id: i64) -> Result<Option<AlgoRun>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM algo_runs WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_run).transpose()
    }

    /// The run currently in state `running`, if any.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn running(&self) -> Result<Option<AlgoRun>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM algo_runs WHERE status = 'running' LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_run).transpose()
    }

    /// Most recent runs first.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn recent(&self, limit: u32) -> Result<Vec<AlgoRun>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM algo_runs ORDER BY id DESC LIMIT ?1"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_run).collect()
    }

    /// `running` → `stopped`. Only the first caller wins; later calls return
    /// `false` and leave the recorded reason untouched.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn mark_stopped(
        &self,
        id: i64,
        reason: &StopReason,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE algo_runs
            SET status = 'stopped', stopped_at = ?2, stop_reason = ?3
            WHERE id = ?1 AND status = 'running'
            ",
        )
        .bind(id)
        .bind(millis(at))
        .bind(reason.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn map_run(row: &SqliteRow) -> Result<AlgoRun> {
    let status: String = row.try_get("status")?;
    let expiry: String = row.try_get("expiry")?;
    let max_loss: String = row.try_get("max_loss_percent")?;
    let stop_loss: String = row.try_get("stop_loss_percent")?;
    let target: String = row.try_get("target_percent")?;

    Ok(AlgoRun {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        expiry: NaiveDate::parse_from_str(&expiry, "%Y-%m-%d")
            .with_context(|| format!("invalid expiry '{expiry}'"))?,
        strategy: row.try_get("strategy")?,
        status: RunStatus::parse(&status).ok_or_else(|| anyhow!("unknown run status '{status}'"))?,
        created_by: row.try_get("created_by")?,
        started_at: from_millis(row.try_get("started_at")?)?,
        stopped_at: opt_from_millis(row.try_get("stopped_at")?)?,
        stop_reason: row.try_get("stop_reason")?,
        risk: RiskParams {
            max_trades_per_day: quantity(row.try_get("max_trades_per_day")?)?,
            max_loss_percent: decimal(&max_loss)?,
            stop_loss_percent: decimal(&stop_loss)?,
            target_percent: decimal(&target)?,
        },
    })
}
