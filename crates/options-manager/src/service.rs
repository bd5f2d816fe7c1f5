//! Background service loops: the position watchdog and the scheduled-exit
//! sync.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::auto_exit::AutoExitScheduler;
use crate::monitor::PositionWatchdog;

/// Runs the position watchdog every `interval` until the task is dropped.
///
/// Cycles never overlap; a failed cycle is logged and the loop continues.
pub async fn run(watchdog: Arc<PositionWatchdog>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "Position watchdog started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        if let Err(e) = watchdog.run_cycle().await {
            error!(error = %e, "Watchdog cycle failed");
        }
    }
}

/// Picks up scheduled exits written to the store by other processes every
/// `interval` until the task is dropped.
pub async fn sync_auto_exits(scheduler: Arc<AutoExitScheduler>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "Scheduled exit sync started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        if let Err(e) = scheduler.recover().await {
            error!(error = %e, "Scheduled exit sync failed");
        }
    }
}
