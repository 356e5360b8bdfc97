//! connector-amqp command line
//!
//! Operator entry point for provisioning connector queues, publishing test
//! messages, tailing a connector's listen queue and probing the broker.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use connector_amqp::config::BrokerConfig;
use connector_amqp::observability::init_default_logging;
use connector_amqp::protocol::ConnectorIdentity;
use connector_amqp::{Broker, ConsumerHandle, DeliveryHandler};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "broker.toml";

#[derive(Parser)]
#[command(name = "connector-amqp")]
#[command(about = "Connector queue provisioning and messaging over RabbitMQ")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "CONNECTOR_AMQP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Declare the exchanges and a connector's queue pair, print its record
    Register {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long = "type")]
        connector_type: String,
        #[arg(long)]
        scope: String,
    },
    /// Register the internal sync and playbook queues
    RegisterInternal,
    /// Delete a connector's listen and push queues
    Unregister { id: String },
    /// Delete both exchanges
    UnregisterExchanges {
        /// Required; this affects every connector
        #[arg(long)]
        yes: bool,
    },
    /// Publish a raw payload
    Publish {
        #[arg(long)]
        exchange: String,
        #[arg(long)]
        routing_key: String,
        payload: String,
    },
    /// Send a JSON message to a connector's listen queue
    PushConnector { id: String, message: String },
    /// Send a JSON message to the internal sync queue
    PushSync { message: String },
    /// Send a JSON message to the internal playbook queue
    PushPlaybook { message: String },
    /// Print every message delivered to a connector until Ctrl-C
    Consume { id: String },
    /// Check the broker accepts an exchange declaration
    Alive,
    /// Print management metrics for this prefix
    Metrics {
        #[arg(long, default_value = "cli")]
        user: String,
    },
    /// Print the broker version
    Version,
    /// Run the broker and management health checks
    Health,
    /// Validate the configuration
    Config {
        /// Print the effective configuration with secrets masked
        #[arg(long)]
        show: bool,
    },
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Config { show } => handle_config_command(&config, show),
        command => match Broker::from_config(config) {
            Ok(broker) => run_command(&broker, command).await,
            Err(e) => Err(e.into()),
        },
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(path: Option<&Path>) -> Result<BrokerConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(BrokerConfig::load_from_file(path)?)
        }
        None => {
            let path = Path::new(DEFAULT_CONFIG_PATH);
            if path.exists() {
                info!("Loading configuration from: {}", path.display());
                Ok(BrokerConfig::load_from_file(path)?)
            } else {
                warn!("No {} found, using defaults", DEFAULT_CONFIG_PATH);
                Ok(BrokerConfig::default())
            }
        }
    }
}

fn handle_config_command(config: &BrokerConfig, show: bool) -> CliResult {
    config.validate()?;
    if show {
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    } else {
        println!("Configuration is valid");
    }
    Ok(())
}

fn parse_json(message: &str) -> Result<Value, Box<dyn std::error::Error>> {
    serde_json::from_str(message).map_err(|e| format!("message is not valid JSON: {e}").into())
}

async fn run_command(broker: &Broker, command: Commands) -> CliResult {
    match command {
        Commands::Register {
            id,
            name,
            connector_type,
            scope,
        } => {
            let identity = ConnectorIdentity::new(id, name, connector_type, scope);
            let record = broker.topology().register_connector_queues(&identity).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::RegisterInternal => {
            for record in broker.topology().register_internal_queues().await? {
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
        }
        Commands::Unregister { id } => {
            let outcome = broker.topology().unregister_connector(&id).await?;
            println!(
                "Deleted {} ({} messages) and {} ({} messages)",
                outcome.listen.queue,
                outcome.listen.message_count,
                outcome.push.queue,
                outcome.push.message_count
            );
        }
        Commands::UnregisterExchanges { yes } => {
            if !yes {
                return Err("refusing to delete exchanges without --yes".into());
            }
            broker.topology().unregister_exchanges().await?;
            println!("Exchanges deleted");
        }
        Commands::Publish {
            exchange,
            routing_key,
            payload,
        } => {
            broker
                .publisher()
                .send(&exchange, &routing_key, payload.as_bytes())
                .await?;
            println!("Message confirmed");
        }
        Commands::PushConnector { id, message } => {
            broker
                .publisher()
                .push_to_connector(&id, &parse_json(&message)?)
                .await?;
            println!("Message confirmed");
        }
        Commands::PushSync { message } => {
            broker.publisher().push_to_sync(&parse_json(&message)?).await?;
            println!("Message confirmed");
        }
        Commands::PushPlaybook { message } => {
            broker
                .publisher()
                .push_to_playbook(&parse_json(&message)?)
                .await?;
            println!("Message confirmed");
        }
        Commands::Consume { id } => consume(broker, &id).await?,
        Commands::Alive => {
            broker.probe().is_alive().await?;
            println!("Broker is alive");
        }
        Commands::Metrics { user } => {
            let metrics = broker.probe().metrics(&user).await?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Commands::Version => println!("{}", broker.probe().version().await),
        Commands::Health => {
            let results = broker.health_checks().run_health_checks().await;
            for result in &results {
                println!(
                    "{}: {} ({}, {}ms)",
                    result.component,
                    if result.healthy { "healthy" } else { "unhealthy" },
                    result.message.as_deref().unwrap_or("-"),
                    result.response_time_ms.unwrap_or_default()
                );
            }
            if results.iter().any(|result| !result.healthy) {
                return Err("broker is unhealthy".into());
            }
        }
        Commands::Config { show } => handle_config_command(broker.config(), show)?,
    }
    Ok(())
}

/// Prints each payload on its own line
struct StdoutHandler;

#[async_trait]
impl DeliveryHandler<()> for StdoutHandler {
    async fn on_message(&self, _context: &(), payload: String) {
        println!("{payload}");
    }
}

async fn consume(broker: &Broker, connector_id: &str) -> CliResult {
    let (handle_tx, handle_rx) = oneshot::channel::<ConsumerHandle>();

    tokio::spawn(async move {
        let Ok(handle) = handle_rx.await else {
            return;
        };
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, closing consumer");
            if let Err(e) = handle.close().await {
                error!("Error closing consumer: {}", e);
            }
        }
    });

    info!(connector_id = %connector_id, "Starting consumer");
    broker
        .consumer()
        .consume_queue(
            (),
            connector_id,
            move |handle| {
                let _ = handle_tx.send(handle);
            },
            StdoutHandler,
        )
        .await?;

    info!("Consumer stopped");
    Ok(())
}
