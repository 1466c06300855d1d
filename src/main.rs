//! brewlink command line
//!
//! `run` keeps the broker link up and logs every pin value it receives;
//! `push` sends a single value; `config` validates and prints the config.

use brewlink::config::LinkConfig;
use brewlink::engine::ConnectionState;
use brewlink::observability::{init_default_logging, metrics};
use brewlink::session::{Session, SessionConfig, TracingSink};
use brewlink::transport::{broker_address, TcpConnector};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["brewlink.toml", "config/brewlink.toml"];

/// IoT cloud broker link for the fermentation controller
#[derive(Parser)]
#[command(name = "brewlink")]
#[command(about = "Persistent link to an IoT cloud broker with virtual pin bridging")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "BREWLINK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and stay connected, logging incoming pin values
    Run,
    /// Push one value to a virtual pin and exit
    Push {
        /// Virtual pin number
        #[arg(long)]
        pin: u32,
        /// Value to send
        #[arg(long, allow_negative_numbers = true)]
        value: f64,
    },
    /// Validate the configuration
    Config {
        /// Print the configuration with the token masked
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_link(config).await,
        Commands::Push { pin, value } => push_value(config, pin, value).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<LinkConfig, Box<dyn std::error::Error>> {
    let path = match config_path {
        Some(path) => path.clone(),
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
            .ok_or("No configuration file found. Provide one with -c/--config or create brewlink.toml")?,
    };

    info!("Loading configuration from: {}", path.display());
    Ok(LinkConfig::load_from_file(&path)?)
}

fn start_session(config: &LinkConfig) -> Result<Session, Box<dyn std::error::Error>> {
    let session_config = SessionConfig::from_link_config(config)?;
    let connector = TcpConnector::new(config.connect_timeout());
    Ok(Session::start(session_config, connector, Arc::new(TracingSink))?)
}

async fn run_link(config: LinkConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        "Starting brewlink v{} for device '{}' via {}",
        env!("CARGO_PKG_VERSION"),
        config.device.name,
        broker_address(&config.broker.host, config.broker.port)
    );

    let session = start_session(&config)?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    session.stop().await?;

    let snapshot = metrics().get_metrics();
    info!(
        connections = snapshot.connection.connections_established,
        heartbeats = snapshot.heartbeat.sent,
        pin_writes = snapshot.pins.writes_received,
        "Link stopped"
    );
    info!("Final metrics: {}", serde_json::to_string(&snapshot)?);
    Ok(())
}

async fn push_value(
    config: LinkConfig,
    pin: u32,
    value: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = start_session(&config)?;
    let handle = session.handle();

    // One heartbeat period covers a connect plus the login exchange.
    let deadline = config.connect_timeout() + config.heartbeat();
    let authenticated =
        tokio::time::timeout(deadline, handle.wait_for_state(ConnectionState::Authenticated)).await;

    let outcome = match authenticated {
        Ok(Ok(())) => match handle.push_value(pin, value) {
            Ok(()) => {
                info!("Pushed v{} = {}", pin, value);
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            warn!("Broker did not accept the login within {:?}", deadline);
            Err("Not connected to broker".into())
        }
    };

    session.stop().await?;
    outcome
}

fn handle_config_command(config: LinkConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    config.resolve_token()?;

    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }

    info!("Configuration validation complete");
    Ok(())
}
