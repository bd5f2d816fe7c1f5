//! Database repositories for the position-lifecycle engine.
//!
//! Each repository owns typed access to one table. State transitions that
//! more than one actor may race on are written as conditional updates and
//! report whether they took effect.

pub mod position_repo;
pub mod run_repo;
pub mod session_repo;
pub mod trade_repo;

pub use position_repo::{ExitFill, PositionRepository};
pub use run_repo::RunRepository;
pub use session_repo::SessionRepository;
pub use trade_repo::TradeRepository;

use sqlx::SqlitePool;

/// Creates all repositories from a single database pool.
#[derive(Debug, Clone)]
pub struct Repositories {
    pub positions: PositionRepository,
    pub runs: RunRepository,
    pub trades: TradeRepository,
    pub sessions: SessionRepository,
}

impl Repositories {
    /// Creates a new set of repositories from a database pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            positions: PositionRepository::new(pool.clone()),
            runs: RunRepository::new(pool.clone()),
            trades: TradeRepository::new(pool.clone()),
            sessions: SessionRepository::new(pool),
        }
    }
}
