use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand};

use algo_options_core::{AppConfig, BrokerSession, ConfigLoader};
use algo_options_data::StopReason;

mod app;
mod instruments;
mod users;

use app::App;

#[derive(Parser)]
#[command(name = "algo-options")]
#[command(about = "Index options strategy runner", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = "config/Config.toml")]
    config: String,

    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the position watchdog, run timers and scheduled exits until stopped
    Run,
    /// Start a strategy run and keep serving it
    Start {
        /// Underlying index (NIFTY, BANKNIFTY, ...)
        #[arg(long)]
        symbol: String,
        /// Option expiry, YYYY-MM-DD
        #[arg(long)]
        expiry: NaiveDate,
        /// Strategy name (short_straddle, long_straddle, short_strangle)
        #[arg(long, default_value = "short_straddle")]
        strategy: String,
        /// Operator recorded on the run
        #[arg(long, env = "USER", default_value = "cli")]
        created_by: String,
    },
    /// Stop a run and square off its open positions
    Stop {
        #[arg(long)]
        run_id: i64,
        /// Stop reason recorded on the run
        #[arg(long)]
        reason: Option<String>,
    },
    /// Show the running run
    Status,
    /// Schedule the exit of a position
    ScheduleExit {
        #[arg(long)]
        position_id: i64,
        /// RFC 3339 timestamp, or HH:MM market time today
        #[arg(long)]
        at: String,
    },
    /// Cancel a scheduled exit
    CancelExit {
        #[arg(long)]
        position_id: i64,
    },
    /// Store broker tokens for a client
    SetSession {
        #[arg(long)]
        client_id: String,
        #[arg(long, env = "ALGO_ACCESS_TOKEN")]
        access_token: String,
        #[arg(long)]
        refresh_token: Option<String>,
        #[arg(long)]
        feed_token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    let config = ConfigLoader::load_from(&cli.config)
        .with_context(|| format!("loading config {}", cli.config))?;

    match cli.command {
        Commands::Run => {
            let app = App::build(config).await?;
            serve(&app).await?;
        }
        Commands::Start {
            symbol,
            expiry,
            strategy,
            created_by,
        } => {
            let app = App::build(config).await?;
            let run = app
                .controller
                .start(&symbol, expiry, &strategy, &created_by)
                .await?;
            print_json(&run)?;
            serve(&app).await?;
        }
        Commands::Stop { run_id, reason } => {
            let app = App::build(config).await?;
            let reason = reason.map_or(StopReason::Manual, StopReason::Other);
            let report = app.controller.stop(run_id, reason).await?;
            print_json(&report)?;
        }
        Commands::Status => {
            let app = App::build(config).await?;
            match app.controller.status().await? {
                Some(overview) => print_json(&overview)?,
                None => println!("no run is running"),
            }
        }
        Commands::ScheduleExit { position_id, at } => {
            let app = App::build(config).await?;
            let exit_time = parse_exit_time(&at, &app.config, Utc::now())?;
            let job_id = app.auto_exits.schedule_exit(position_id, exit_time).await?;
            println!("scheduled {job_id} at {exit_time}; a running daemon picks it up");
        }
        Commands::CancelExit { position_id } => {
            let app = App::build(config).await?;
            if app.auto_exits.cancel_exit(position_id).await? {
                println!("cancelled auto-exit of position {position_id}");
            } else {
                println!("no pending auto-exit job in this process; stored status set to cancelled");
            }
        }
        Commands::SetSession {
            client_id,
            access_token,
            refresh_token,
            feed_token,
        } => {
            let app = App::build(config).await?;
            app.repos
                .sessions
                .upsert(&BrokerSession {
                    client_id: client_id.clone(),
                    access_token,
                    refresh_token,
                    feed_token,
                })
                .await?;
            println!("session stored for {client_id}");
        }
    }

    Ok(())
}

fn init_logging(log_file: Option<&str>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

/// Restores persisted timers, runs the watchdog and the scheduled-exit sync,
/// and waits for a shutdown signal.
async fn serve(app: &App) -> Result<()> {
    match app.auto_exits.recover().await {
        Ok(n) => tracing::info!(restored = n, "scheduled exits recovered"),
        Err(e) => tracing::error!(error = %e, "failed to recover scheduled exits"),
    }
    if let Some(run) = app.controller.recover().await? {
        tracing::info!(run_id = run.id, symbol = %run.symbol, "serving running run");
    }

    let exit_sync = tokio::spawn(algo_options_manager::service::sync_auto_exits(
        app.auto_exits.clone(),
        app.config.auto_exit.sync_interval(),
    ));

    let watchdog = app.config.watchdog.enabled.then(|| {
        let interval = std::time::Duration::from_secs(app.config.watchdog.interval_secs.max(1));
        tokio::spawn(algo_options_manager::service::run(
            app.watchdog.clone(),
            interval,
        ))
    });

    shutdown_signal().await?;

    tracing::info!("shutting down");
    app.controller.shutdown().await;
    if let Some(handle) = watchdog {
        handle.abort();
    }
    exit_sync.abort();
    tracing::info!("engine stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
        _ = sigint.recv() => tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    Ok(())
}

/// Parses `--at`: an RFC 3339 timestamp, or `HH:MM` market time today.
fn parse_exit_time(at: &str, config: &AppConfig, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(at) {
        return Ok(ts.with_timezone(&Utc));
    }
    let Ok(time) = NaiveTime::parse_from_str(at, "%H:%M") else {
        bail!("invalid exit time '{at}', expected RFC 3339 or HH:MM");
    };
    let tz = config.run.tz()?;
    let today = now.with_timezone(&tz).date_naive();
    tz.from_local_datetime(&today.and_time(time))
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("{at} does not exist in {tz} today"))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
