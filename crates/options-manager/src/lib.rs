//! Deterministic options position management.
//!
//! Runs alongside the run controller and:
//! - Serves broker quotes through a short-lived cache
//! - Watches open legs against their stop-loss and target prices
//! - Executes time-delayed exits through a job scheduler
//! - Enforces the aggregate max-loss of a running strategy run
//!
//! Every exit goes through [`ExitExecutor`], which serialises attempts on a
//! position with a conditional claim in the store.

pub mod auto_exit;
pub mod error;
pub mod executor;
pub mod jobs;
pub mod monitor;
pub mod quote_cache;
pub mod risk;
pub mod service;
pub mod stops;
pub mod targets;
pub mod types;

#[cfg(test)]
mod testing;

pub use auto_exit::AutoExitScheduler;
pub use error::{AutoExitError, ExitError, JobError, QuoteError};
pub use executor::{auto_exit_job_key, ExitExecutor, ExitSettings};
pub use jobs::{InMemoryJobScheduler, JobHandler, JobScheduler, RetryPolicy};
pub use monitor::{CycleReport, PositionWatchdog};
pub use quote_cache::QuoteCache;
pub use risk::{RiskEnforcer, RiskSnapshot, RiskVerdict};
pub use types::{ExitOutcome, ExitReason, LegThresholds};
