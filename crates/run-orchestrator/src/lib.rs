//! Strategy run orchestration.
//!
//! [`RunController`] owns the lifecycle of the single running strategy run:
//! it places trade batches for every eligible user, ticks the run on a timer
//! and stops it at end of day, on max loss or on the daily trade limit,
//! squaring off the run's open legs on the way out.

pub mod calendar;
pub mod controller;
pub mod error;
pub mod placement;
pub mod timers;

#[cfg(test)]
mod testing;

pub use calendar::MarketCalendar;
pub use controller::{
    ControllerSettings, RunController, RunOverview, RunServices, StopReport, TickOutcome,
};
pub use error::RunError;
pub use placement::{BatchOutcome, BatchReport};
pub use timers::RunTimers;
