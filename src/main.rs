//! mqtt-supervisor - Main Entry Point
//!
//! Keeps a broker connection alive, re-subscribes configured topics on every
//! connect and publishes stdin lines through the ordered publish queue.

use clap::{Parser, Subcommand};
use mqtt_supervisor::config::SupervisorConfig;
use mqtt_supervisor::observability::init_default_logging;
use mqtt_supervisor::supervisor::{Notification, Supervisor, SupervisorHandle};
use mqtt_supervisor::transport::mqtt::RumqttcConnector;
use mqtt_supervisor::transport::{PublishOptions, QoS};
use std::path::PathBuf;
use std::process;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

/// Self-healing MQTT connection supervisor
#[derive(Parser)]
#[command(name = "mqtt-supervisor")]
#[command(about = "Self-healing MQTT connection with an ordered publish queue")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MQTT_SUPERVISOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, subscribe configured topics and publish stdin lines
    Run {
        /// Publish each stdin line to this topic
        #[arg(long, value_name = "TOPIC")]
        publish_topic: Option<String>,

        /// QoS used for stdin publishes (0, 1 or 2)
        #[arg(long, default_value_t = 1)]
        qos: u8,
    },
    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting mqtt-supervisor v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { publish_topic, qos } => run_supervisor(config, publish_topic, qos).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    explicit: Option<&std::path::Path>,
) -> Result<SupervisorConfig, Box<dyn std::error::Error>> {
    let Some(path) = SupervisorConfig::locate(explicit) else {
        return Err(
            "No configuration file found. Provide one with -c/--config or create mqtt-supervisor.toml"
                .into(),
        );
    };
    info!("Loading configuration from: {}", path.display());
    Ok(SupervisorConfig::load_from_file(&path)?)
}

async fn run_supervisor(
    config: SupervisorConfig,
    publish_topic: Option<String>,
    qos: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let options = config.to_supervisor_options()?;
    let subscriptions = config.subscription_topics()?;
    let publish_qos =
        QoS::from_level(qos).ok_or_else(|| format!("invalid QoS {qos}; expected 0, 1 or 2"))?;

    let (supervisor, handle) = Supervisor::new(options, RumqttcConnector)?;
    let mut events = handle.events();
    let task = tokio::spawn(supervisor.run());

    if let Some(topic) = publish_topic {
        tokio::spawn(forward_stdin(
            handle.clone(),
            topic,
            PublishOptions::new(publish_qos, false),
        ));
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            notification = events.recv() => match notification {
                Ok(Notification::Connect) => subscribe_all(&handle, &subscriptions).await,
                Ok(Notification::Message(message)) => {
                    info!(
                        topic = %message.topic,
                        qos = message.qos.level(),
                        retain = message.retain,
                        payload = %message.payload_lossy(),
                        "Message received"
                    );
                }
                Ok(Notification::Close(reason)) => warn!("Connection closed: {}", reason),
                Ok(Notification::Error(reason)) => warn!("Connection error: {}", reason),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notification receiver lagged");
                }
                Err(RecvError::Closed) => {
                    error!("Supervisor stopped unexpectedly");
                    break;
                }
            }
        }
    }

    if let Ok(snapshot) = handle.snapshot().await {
        info!(
            unsent = snapshot.queued.len(),
            acknowledged = snapshot.stats.acknowledged,
            dropped = snapshot.stats.dropped,
            reconnects = snapshot.stats.reconnects_scheduled,
            "Final supervisor statistics"
        );
    }
    // Already stopped is fine here
    let _ = handle.shutdown().await;
    task.await?;
    Ok(())
}

/// Subscriptions are not replayed by the supervisor, so redo them per connect
async fn subscribe_all(handle: &SupervisorHandle, subscriptions: &[(String, QoS)]) {
    for (topic, qos) in subscriptions {
        match handle.subscribe(topic.clone(), *qos).await {
            Ok(()) => info!(topic = %topic, "Subscribed"),
            Err(e) => warn!(topic = %topic, "Subscribe failed: {}", e),
        }
    }
}

async fn forward_stdin(handle: SupervisorHandle, topic: String, options: PublishOptions) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.is_empty() => continue,
            Ok(Some(line)) => handle.publish(topic.clone(), line, options),
            Ok(None) => {
                info!("stdin closed, no more messages to publish");
                break;
            }
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }
}

fn handle_config_command(
    config: &SupervisorConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (endpoint, security) = config.resolve_endpoint()?;
    if show {
        println!("Current configuration:");
        println!("{}", config.to_toml()?);
        println!("# resolved broker: {}:{} ({:?})", endpoint.host, endpoint.port, security);
    }

    info!("Configuration validation complete");
    Ok(())
}
