//! Durable store for the position-lifecycle engine.
//!
//! This crate provides:
//! - SQLite connection handling and migrations
//! - Data models for positions, runs and leg audit records
//! - Repositories for typed database access

mod codec;
pub mod database;
pub mod models;
pub mod repositories;

pub use database::Database;

pub use models::{
    AlgoRun, AlgoTrade, AutoExit, AutoExitStatus, NewPosition, NewRun, NewTrade, Position,
    PositionStatus, RunStatus, StopReason, TradeMode, TradeStatus,
};

pub use repositories::{
    ExitFill, PositionRepository, Repositories, RunRepository, SessionRepository,
    TradeRepository,
};
