//! Core types, collaborator traits, errors and configuration shared by the
//! position-lifecycle engine.

pub mod clock;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod traits;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AppConfig, AutoExitConfig, BrokerConfig, BrokerMode, DatabaseConfig, ExitConfig,
    InstrumentConfig, QuoteConfig, RiskOverrides, RiskParams, RunConfig, UserConfig,
    WatchdogConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{BrokerError, CollaboratorError, INVALID_TOKEN_CODE};
pub use traits::{BrokerGateway, InstrumentRepository, StrategyResolver, UserDirectory};
pub use types::{
    BrokerSession, Leg, LicenceMode, Ltp, OptionType, OrderAck, OrderRequest, OrderType, Side,
    TradingUser,
};
