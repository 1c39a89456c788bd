//! # Queue Bridge Producer
//!
//! Binary entry point for the producer HTTP service.
//!
//! This executable:
//! - Loads configuration from the environment and files
//! - Initializes logging
//! - Opens separate broker clients for sending and draining
//! - Starts the HTTP server from queue-bridge-api

use bus_runtime::{QueueClient, QueueClientFactory};
use queue_bridge_api::{start_server, AppState, ServiceError};
use queue_bridge_core::{BridgeConfig, DrainService, LoggingSettings, ProducerService};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;

const EXIT_CONNECTION: i32 = 4;

#[tokio::main]
async fn main() {
    let config = match BridgeConfig::load(None) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&LoggingSettings::default());
            error!(error = %e, "Failed to load configuration");
            std::process::exit(exit_code(&ServiceError::Configuration(e)));
        }
    };

    init_tracing(&config.logging);
    info!(config = ?config, "Starting queue bridge producer");

    let queue = match config.queue_name() {
        Ok(queue) => queue,
        Err(e) => {
            error!(error = %e, "Invalid queue name");
            std::process::exit(exit_code(&ServiceError::Configuration(e)));
        }
    };

    // Producer and drain each get their own handle.
    let mut clients = match QueueClientFactory::create_clients(config.queue_config(), 2).await {
        Ok(clients) => clients.into_iter().map(Arc::<dyn QueueClient>::from),
        Err(e) => {
            error!(error = %e, "Failed to create queue clients");
            std::process::exit(EXIT_CONNECTION);
        }
    };
    let (Some(producer_client), Some(drain_client)) = (clients.next(), clients.next()) else {
        error!("Queue client factory returned too few clients");
        std::process::exit(EXIT_CONNECTION);
    };

    let producer = ProducerService::new(producer_client, queue.clone());
    let drain = DrainService::new(drain_client, queue, config.drain_loop_config());

    info!(
        host = %config.server.host,
        port = config.server.port,
        provider = ?config.queue.provider,
        "Starting HTTP server"
    );

    if let Err(e) = start_server(AppState::new(config, producer, drain)).await {
        error!("Server stopped with error: {}", e);
        std::process::exit(exit_code(&e));
    }

    info!("Queue bridge producer stopped");
}

/// Process exit code for a service failure
fn exit_code(error: &ServiceError) -> i32 {
    match error {
        ServiceError::BindFailed { .. } => 1,
        ServiceError::ServerFailed { .. } => 2,
        ServiceError::Configuration(_) => 3,
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=debug", logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
