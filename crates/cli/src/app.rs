//! Wiring of the engine from [`AppConfig`].

use std::sync::Arc;
use std::time::Duration;

use algo_options_broker::{PaperBroker, SmartApiClient, SmartApiConfig};
use algo_options_core::{AppConfig, BrokerGateway, BrokerMode, Clock, SystemClock};
use algo_options_data::{Database, Repositories};
use algo_options_manager::{
    AutoExitScheduler, ExitExecutor, ExitSettings, InMemoryJobScheduler, PositionWatchdog,
    QuoteCache, RetryPolicy, RiskEnforcer,
};
use algo_options_orchestrator::{ControllerSettings, RunController, RunServices};
use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::instruments::{ChainResolver, InstrumentMaster};
use crate::users::ConfigUserDirectory;

pub struct App {
    pub config: AppConfig,
    pub repos: Repositories,
    pub watchdog: Arc<PositionWatchdog>,
    pub auto_exits: Arc<AutoExitScheduler>,
    pub controller: Arc<RunController>,
}

impl App {
    /// Connects the store and builds every component.
    ///
    /// # Errors
    /// Returns an error if the database, broker client, instrument master or
    /// run settings cannot be set up.
    pub async fn build(config: AppConfig) -> Result<Self> {
        let db = Database::connect(&config.database.url, config.database.max_connections)
            .await
            .with_context(|| format!("opening database {}", config.database.url))?;
        let repos = db.repositories();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let broker = build_broker(&config)?;
        let quotes = Arc::new(QuoteCache::new(
            broker.clone(),
            repos.sessions.clone(),
            clock.clone(),
            config.quotes.min_fetch_interval(),
        ));

        let jobs = Arc::new(InMemoryJobScheduler::new(RetryPolicy::from(&config.auto_exit)));
        let exits = Arc::new(ExitExecutor::new(
            repos.positions.clone(),
            repos.sessions.clone(),
            broker.clone(),
            jobs.clone(),
            clock.clone(),
            ExitSettings {
                claim_ttl: Duration::from_secs(config.exits.claim_ttl_secs),
                product_type: product_type(&config),
            },
        ));
        let auto_exits = Arc::new(AutoExitScheduler::new(
            repos.positions.clone(),
            jobs,
            exits.clone(),
            quotes.clone(),
            clock.clone(),
        ));

        let master = Arc::new(load_master(&config.instruments.path)?);
        let users = Arc::new(ConfigUserDirectory::new(&config.users));
        let quote_client_id = config
            .quotes
            .market_data_client_id
            .clone()
            .or_else(|| users.first_client_id().map(str::to_string))
            .unwrap_or_default();
        if quote_client_id.is_empty() {
            warn!("no live client configured for spot quotes, leg resolution will fail");
        }
        let strategies = Arc::new(ChainResolver::new(
            master.clone(),
            quotes.clone(),
            quote_client_id,
            config.instruments.strangle_offset,
        ));

        let watchdog = Arc::new(PositionWatchdog::new(
            repos.positions.clone(),
            master,
            quotes.clone(),
            exits.clone(),
            config.quotes.market_data_client_id.clone(),
        ));
        let risk = Arc::new(RiskEnforcer::new(
            repos.positions.clone(),
            quotes.clone(),
            exits.clone(),
        ));

        let controller = RunController::new(
            RunServices {
                repos: repos.clone(),
                broker,
                strategies,
                users,
                quotes,
                exits,
                risk,
                clock,
            },
            ControllerSettings::from_config(&config.run, product_type(&config))?,
        );

        Ok(Self {
            config,
            repos,
            watchdog,
            auto_exits,
            controller,
        })
    }
}

fn product_type(config: &AppConfig) -> Option<String> {
    let p = config.broker.product_type.trim();
    (!p.is_empty()).then(|| p.to_string())
}

fn build_broker(config: &AppConfig) -> Result<Arc<dyn BrokerGateway>> {
    let has_api = !config.broker.api_key.is_empty();
    let broker: Arc<dyn BrokerGateway> = match (config.broker.mode, has_api) {
        (BrokerMode::Live, _) => {
            let client = SmartApiClient::new(SmartApiConfig::from(&config.broker))?;
            info!(base_url = %client.base_url(), "live broker configured");
            Arc::new(client)
        }
        (BrokerMode::Paper, true) => {
            let upstream = Arc::new(SmartApiClient::new(SmartApiConfig::from(&config.broker))?);
            info!("paper broker with live market data");
            Arc::new(PaperBroker::with_market_data(upstream))
        }
        (BrokerMode::Paper, false) => {
            warn!("paper broker without market data, quotes unavailable");
            Arc::new(PaperBroker::new())
        }
    };
    Ok(broker)
}

fn load_master(path: &str) -> Result<InstrumentMaster> {
    if std::path::Path::new(path).exists() {
        InstrumentMaster::load(path)
    } else {
        warn!(path, "instrument master not found, starting with an empty one");
        Ok(InstrumentMaster::default())
    }
}
