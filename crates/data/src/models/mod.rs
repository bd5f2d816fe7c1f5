//! Data models for the persisted trading state.

pub mod position;
pub mod run;
pub mod trade;

pub use position::{AutoExit, AutoExitStatus, NewPosition, Position, PositionStatus};
pub use run::{AlgoRun, NewRun, RunStatus, StopReason};
pub use trade::{AlgoTrade, NewTrade, TradeMode, TradeStatus};
