//! # Queue Bridge CLI
//!
//! Command-line front end for the queue bridge.
//!
//! This module provides CLI commands for:
//! - Running the consumer, either until interrupted or for a single message
//! - Draining the queue within a deadline
//! - Sending a batch of numbered messages
//! - Validating and displaying configuration

use bus_runtime::{QueueClient, QueueClientFactory, QueueError};
use clap::{Parser, Subcommand};
use queue_bridge_core::{
    cancel_on_shutdown, BridgeConfig, BridgeConfigError, CancellationSignal, ConsumerExit,
    ConsumerService, DrainService, LoggingSettings, LoopConfig, ProducerService,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue Bridge CLI - send, consume and drain broker messages
#[derive(Debug, Parser)]
#[command(name = "queue-bridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send, consume and drain messages on a broker queue")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "BRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level, overriding the configured one
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Receive and acknowledge messages until interrupted
    Consume {
        /// Stop after the first acknowledged message
        #[arg(long)]
        once: bool,
    },

    /// Empty the queue, giving up once the deadline passes
    Drain {
        /// Drain deadline in milliseconds; defaults to `drain.deadline_ms`
        #[arg(long)]
        deadline_ms: Option<u64>,
    },

    /// Send numbered messages to the queue
    Send {
        /// Number of messages to send
        #[arg(short = 'n', long)]
        count: u32,
    },

    /// Validate configuration
    Config {
        /// Show resolved configuration with secrets masked
        #[arg(short, long)]
        show: bool,
    },
}

// ============================================================================
// Errors
// ============================================================================

/// CLI errors, each mapped to a distinct process exit code
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] BridgeConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] QueueError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Connection(_) => 2,
            Self::CommandFailed { .. } => 3,
        }
    }

    fn command_failed(error: impl std::fmt::Display) -> Self {
        Self::CommandFailed {
            message: error.to_string(),
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Parse arguments, run the command and print its summary
pub async fn run_cli() -> Result<(), CliError> {
    let summary = run(Cli::parse()).await?;
    println!("{}", summary);
    Ok(())
}

/// Run a parsed command line and return the summary line
pub async fn run(cli: Cli) -> Result<String, CliError> {
    let mut config = BridgeConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json_logs {
        config.logging.json_format = true;
    }

    initialize_logging(&config.logging);

    if let Commands::Config { show } = cli.command {
        return describe_config(&config, show);
    }

    let client: Arc<dyn QueueClient> =
        Arc::from(QueueClientFactory::create_client(config.queue_config()).await?);

    let cancel = CancellationSignal::new();
    let watcher = cancel_on_shutdown(cancel.clone());
    let result = execute_command(cli.command, &config, client, &cancel).await;
    watcher.abort();

    result
}

/// Run one command against `client`.
///
/// `cancel` stops a running consumer between cycles; the other commands run
/// to completion.
pub async fn execute_command(
    command: Commands,
    config: &BridgeConfig,
    client: Arc<dyn QueueClient>,
    cancel: &CancellationSignal,
) -> Result<String, CliError> {
    let queue = config.queue_name()?;

    match command {
        Commands::Consume { once } => {
            let consumer = ConsumerService::new(client, queue, config.consumer_loop_config());
            let exit = if once {
                consumer.run_once(cancel).await
            } else {
                consumer.run(cancel).await
            }
            .map_err(CliError::command_failed)?;

            Ok(match exit {
                ConsumerExit::Cancelled { acknowledged } => format!(
                    "Consumer interrupted after acknowledging {} messages",
                    acknowledged
                ),
                ConsumerExit::Completed { acknowledged } => {
                    format!("Consumer acknowledged {} messages", acknowledged)
                }
            })
        }
        Commands::Drain { deadline_ms } => {
            let loop_config = match deadline_ms {
                Some(ms) => LoopConfig {
                    overall_deadline: Some(Duration::from_millis(ms)),
                    ..config.drain_loop_config()
                },
                None => config.drain_loop_config(),
            };

            let report = DrainService::new(client, queue, loop_config)
                .drain_with_cancel(cancel)
                .await
                .map_err(CliError::command_failed)?;

            Ok(format!(
                "Drained {} messages in {} ms",
                report.acknowledged,
                report.elapsed.as_millis()
            ))
        }
        Commands::Send { count } => {
            let report = ProducerService::new(client, queue)
                .enqueue(count)
                .await
                .map_err(|e| {
                    error!(sent = e.sent(), error = %e, "Send failed");
                    CliError::command_failed(e)
                })?;

            Ok(format!("Sent {} messages to queue", report.sent))
        }
        Commands::Config { show } => describe_config(config, show),
    }
}

/// Summarise a configuration that has already passed validation
pub fn describe_config(config: &BridgeConfig, show: bool) -> Result<String, CliError> {
    config.validate()?;

    if !show {
        return Ok("Configuration is valid".to_string());
    }

    serde_json::to_string_pretty(&config.redacted()).map_err(CliError::command_failed)
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Logs go to stderr so command summaries on stdout stay parseable.
fn initialize_logging(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if logging.json_format {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    if result.is_ok() {
        info!(level = %logging.level, "Logging initialised");
    }
}
