//! Market-local time: the end-of-day cutoff and the start of the trading day.

use algo_options_core::RunConfig;
use anyhow::Result;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketCalendar {
    tz: Tz,
    cutoff: NaiveTime,
}

impl MarketCalendar {
    #[must_use]
    pub const fn new(tz: Tz, cutoff: NaiveTime) -> Self {
        Self { tz, cutoff }
    }

    /// Builds the calendar from the run section of the config.
    ///
    /// # Errors
    /// Returns an error for an unknown time zone or a malformed cutoff.
    pub fn from_config(run: &RunConfig) -> Result<Self> {
        Ok(Self::new(run.tz()?, run.cutoff()?))
    }

    /// Whether local time at `now` is at or after the cutoff.
    #[must_use]
    pub fn is_past_cutoff(&self, now: DateTime<Utc>) -> bool {
        now.with_timezone(&self.tz).time() >= self.cutoff
    }

    /// Local midnight of the day containing `now`, in UTC.
    #[must_use]
    pub fn day_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = now.with_timezone(&self.tz).date_naive().and_time(NaiveTime::MIN);
        self.tz
            .from_local_datetime(&midnight)
            .earliest()
            .map_or_else(|| midnight.and_utc(), |local| local.with_timezone(&Utc))
    }
}
