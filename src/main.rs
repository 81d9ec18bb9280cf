//! Demo client for the MQTT session manager
//!
//! Connects, subscribes to the configured topic, publishes the configured
//! message, then waits for Ctrl-C and disconnects cleanly.

use clap::{Parser, Subcommand};
use mqtt_session::config::CONNECT_TIMEOUT;
use mqtt_session::observability::init_default_logging;
use mqtt_session::{EventSink, QosLevel, SessionConfig, SessionManager, SessionState};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// MQTT session manager demo client
#[derive(Parser)]
#[command(name = "mqtt-session")]
#[command(about = "Publish/subscribe session manager demo client")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, subscribe and publish, then wait for messages
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

/// Sink that logs every session event
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn on_connected(&self) {
        info!("connected to broker");
    }

    fn on_connection_failed(&self, reason: &str) {
        error!(%reason, "connection failed");
    }

    fn on_disconnected(&self) {
        info!("disconnected");
    }

    fn on_connection_lost(&self, cause: &str) {
        warn!(%cause, "connection lost");
    }

    fn on_message_received(&self, topic: &str, payload: &[u8]) {
        info!(%topic, payload = %String::from_utf8_lossy(payload), "message received");
    }

    fn on_message_published(&self, topic: &str) {
        info!(%topic, "message published");
    }

    fn on_subscribe_success(&self, topic: &str) {
        info!(%topic, "subscribed");
    }

    fn on_subscribe_failed(&self, topic: &str, reason: &str) {
        error!(%topic, %reason, "subscribe failed");
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_session(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {e}");
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(SessionConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["session.toml", "config/session.toml"];
            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(SessionConfig::load_from_file(&path)?);
                }
            }
            info!("No configuration file found, using defaults");
            Ok(SessionConfig::default())
        }
    }
}

async fn run_session(config: SessionConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(broker_url = %config.broker_url, "starting session");

    let subscribe_topic = config.subscribe_topic.clone();
    let publish_topic = config.publish_topic.clone();
    let message = config.message.clone();

    let manager = SessionManager::new(config, Arc::new(ConsoleSink));
    let mut state_rx = manager.watch_state();

    manager.connect().await?;

    // Wait until the broker acknowledges (or the attempt fails).
    let connected = tokio::time::timeout(CONNECT_TIMEOUT + std::time::Duration::from_secs(1), async {
        loop {
            if *state_rx.borrow() == SessionState::Connected {
                return true;
            }
            if *state_rx.borrow() == SessionState::Disconnected {
                return false;
            }
            if state_rx.changed().await.is_err() {
                return false;
            }
        }
    })
    .await
    .unwrap_or(false);

    if !connected {
        return Err("could not establish a connection to the broker".into());
    }

    manager
        .subscribe(&subscribe_topic, QosLevel::AtLeastOnce)
        .await?;
    manager
        .publish(&publish_topic, message, QosLevel::AtLeastOnce, false)
        .await?;

    info!("running; press Ctrl-C to disconnect");
    signal::ctrl_c().await?;

    manager.disconnect().await?;
    Ok(())
}

fn handle_config_command(
    config: SessionConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Configuration is valid");
    if show {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}
