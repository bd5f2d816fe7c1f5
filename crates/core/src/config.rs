use crate::types::{LicenceMode, TradingUser};
use anyhow::{Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub quotes: QuoteConfig,
    pub watchdog: WatchdogConfig,
    pub run: RunConfig,
    pub exits: ExitConfig,
    pub auto_exit: AutoExitConfig,
    pub instruments: InstrumentConfig,
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://algo_options.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Live brokers talk HTTP; paper simulates fills locally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerMode {
    #[default]
    Live,
    Paper,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub mode: BrokerMode,
    pub base_url: String,
    pub api_key: String,
    /// Per-request client timeout.
    pub timeout_secs: u64,
    pub requests_per_second: u32,
    pub product_type: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mode: BrokerMode::Live,
            base_url: "https://apiconnect.angelone.in".to_string(),
            api_key: String::new(),
            timeout_secs: 15,
            requests_per_second: 10,
            product_type: "INTRADAY".to_string(),
        }
    }
}

impl BrokerConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteConfig {
    pub min_fetch_interval_ms: u64,
    /// Session used for watchdog quotes; defaults to the position's client.
    pub market_data_client_id: Option<String>,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            min_fetch_interval_ms: 1500,
            market_data_client_id: None,
        }
    }
}

impl QuoteConfig {
    #[must_use]
    pub const fn min_fetch_interval(&self) -> Duration {
        Duration::from_millis(self.min_fetch_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 15,
        }
    }
}

/// Risk limits attached to a run when it starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RiskParams {
    pub max_trades_per_day: u32,
    pub max_loss_percent: Decimal,
    pub stop_loss_percent: Decimal,
    pub target_percent: Decimal,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            max_trades_per_day: 3,
            max_loss_percent: Decimal::from(2),
            stop_loss_percent: Decimal::from(30),
            target_percent: Decimal::from(50),
        }
    }
}

/// Per-strategy overrides of [`RiskParams`]; unset fields keep the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskOverrides {
    pub max_trades_per_day: Option<u32>,
    pub max_loss_percent: Option<Decimal>,
    pub stop_loss_percent: Option<Decimal>,
    pub target_percent: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub interval_secs: u64,
    /// Local market time after which runs are squared off, `HH:MM`.
    pub eod_cutoff: String,
    pub timezone: String,
    pub exchange: String,
    pub risk: RiskParams,
    pub strategy_overrides: HashMap<String, RiskOverrides>,
    pub lot_sizes: HashMap<String, u32>,
}

impl Default for RunConfig {
    fn default() -> Self {
        let lot_sizes = [("NIFTY", 75), ("BANKNIFTY", 35), ("FINNIFTY", 65), ("SENSEX", 20)]
            .into_iter()
            .map(|(symbol, lots)| (symbol.to_string(), lots))
            .collect();
        Self {
            interval_secs: 30,
            eod_cutoff: "15:20".to_string(),
            timezone: "Asia/Kolkata".to_string(),
            exchange: "NFO".to_string(),
            risk: RiskParams::default(),
            strategy_overrides: HashMap::new(),
            lot_sizes,
        }
    }
}

impl RunConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Parses the end-of-day cutoff.
    ///
    /// # Errors
    /// Returns an error if `eod_cutoff` is not `HH:MM` or `HH:MM:SS`.
    pub fn cutoff(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.eod_cutoff, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&self.eod_cutoff, "%H:%M:%S"))
            .with_context(|| format!("invalid eod_cutoff '{}'", self.eod_cutoff))
    }

    /// Parses the market time zone.
    ///
    /// # Errors
    /// Returns an error for an unknown IANA zone name.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid timezone '{}': {e}", self.timezone))
    }

    /// Default risk parameters with the strategy's overrides applied.
    #[must_use]
    pub fn risk_for(&self, strategy: &str) -> RiskParams {
        let mut params = self.risk.clone();
        if let Some(o) = self.strategy_overrides.get(strategy) {
            if let Some(v) = o.max_trades_per_day {
                params.max_trades_per_day = v;
            }
            if let Some(v) = o.max_loss_percent {
                params.max_loss_percent = v;
            }
            if let Some(v) = o.stop_loss_percent {
                params.stop_loss_percent = v;
            }
            if let Some(v) = o.target_percent {
                params.target_percent = v;
            }
        }
        params
    }

    #[must_use]
    pub fn lot_size(&self, symbol: &str) -> Option<u32> {
        self.lot_sizes.get(&symbol.to_uppercase()).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    /// Age after which an unfinished exit claim is considered abandoned.
    pub claim_ttl_secs: u64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self { claim_ttl_secs: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoExitConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: u32,
    /// How often the daemon picks up exits scheduled by other processes.
    pub sync_interval_secs: u64,
}

impl Default for AutoExitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            backoff_multiplier: 2,
            sync_interval_secs: 5,
        }
    }
}

impl AutoExitConfig {
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// JSON dump of the broker instrument master.
    pub path: String,
    /// Distance in strikes from ATM for strangles.
    pub strangle_offset: u32,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            path: "config/instruments.json".to_string(),
            strangle_offset: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub user_id: String,
    pub client_id: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_true")]
    pub trading_enabled: bool,
    #[serde(default)]
    pub licence: LicenceMode,
}

const fn default_true() -> bool {
    true
}

impl From<&UserConfig> for TradingUser {
    fn from(u: &UserConfig) -> Self {
        Self {
            user_id: u.user_id.clone(),
            client_id: u.client_id.clone(),
            active: u.active,
            trading_enabled: u.trading_enabled,
            licence: u.licence,
        }
    }
}
