//! CLI for amqp-logger
//!
//! Subcommands:
//! - `send`: publish one log event through the configured transports
//! - `tail`: print log messages arriving on the exchange

use std::path::PathBuf;

use amqp_logger::amqp::{Consumer, Payload};
use amqp_logger::config::{Settings, load_config, load_config_from};
use amqp_logger::event::{Level, LogArg, LogEvent};
use amqp_logger::logger::Logger;
use amqp_logger::utils::logging;
use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "amqp-logger")]
struct Cli {
    /// Configuration file to use instead of config/default.*
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish one log event and wait until the broker has confirmed it
    Send {
        #[arg(long, default_value = "INFO")]
        level: Level,
        /// Correlation id appended to chunks of a split message
        #[arg(long)]
        eid: Option<String>,
        /// Extra JSON argument attached to the event (repeatable)
        #[arg(long = "json-data")]
        json_data: Vec<String>,
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Print messages published to the log exchange until Ctrl-C
    Tail {
        /// Queue to consume from; a temporary queue when omitted
        #[arg(long, default_value = "")]
        queue: String,
        /// Routing-key pattern to bind (repeatable, default `<prefix>.#`)
        #[arg(long)]
        binding: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = match cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };
    logging::init(&settings.logging.level);

    let result = match cli.command {
        Command::Send {
            level,
            eid,
            json_data,
            message,
        } => run_send(&settings, level, eid, json_data, message.join(" ")).await,
        Command::Tail { queue, binding } => run_tail(&settings, &queue, binding).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run_send(
    settings: &Settings,
    level: Level,
    eid: Option<String>,
    json_data: Vec<String>,
    message: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = json_data
        .iter()
        .map(|raw| serde_json::from_str(raw).map(LogArg::Value))
        .collect::<Result<Vec<_>, _>>()?;

    let mut event = LogEvent::new(level, message).with_data(data);
    if let Some(eid) = eid {
        event = event.with_eid(eid);
    }

    let logger = Logger::open(settings).await?;
    logger.log_event(&event);
    logger.close().await;
    Ok(())
}

async fn run_tail(
    settings: &Settings,
    queue: &str,
    mut bindings: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    if bindings.is_empty() {
        bindings.push(format!("{}.#", settings.amqp.route_key_prefix));
    }

    let mut consumer = Consumer::connect(&settings.amqp, queue, &bindings).await?;
    info!(queue = consumer.queue(), bindings = ?bindings, "tailing log exchange");

    loop {
        tokio::select! {
            next = consumer.next() => match next {
                Some(Ok(message)) => {
                    let body = match message.payload {
                        Payload::Text(text) => text,
                        Payload::Json(value) => value.to_string(),
                        Payload::Binary(bytes) => format!("<{} bytes>", bytes.len()),
                    };
                    println!("{} {}", message.routing_key, body);
                }
                Some(Err(e)) => error!("Failed to read message: {}", e),
                None => {
                    info!("Consumer cancelled by broker.");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting gracefully.");
                break;
            }
        }
    }

    consumer.close().await;
    Ok(())
}
