//! # Queue Bridge Core
//!
//! Services that move messages between HTTP callers and a broker queue.
//!
//! Everything here is written against the [`bus_runtime::QueueClient`] trait,
//! so the same services run against Azure Service Bus in production and the
//! in-memory provider in tests.
//!
//! - [`ReceiveLoop`] is the receive, log and acknowledge state machine.
//! - [`ConsumerService`] runs it until cancelled.
//! - [`DrainService`] runs it against a deadline to empty a queue.
//! - [`ProducerService`] enqueues numbered messages.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bus_runtime::{QueueClient, QueueClientFactory, QueueName};
//! use queue_bridge_core::{DrainService, ProducerService};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client: Arc<dyn QueueClient> = Arc::from(QueueClientFactory::create_test_client());
//! let queue = QueueName::new("orders".to_string())?;
//!
//! ProducerService::new(client.clone(), queue.clone()).enqueue(3).await?;
//!
//! let drain = DrainService::with_deadline(client, queue, Duration::from_millis(50));
//! let report = drain.drain().await?;
//! assert_eq!(report.acknowledged, 3);
//! # Ok(())
//! # }
//! ```

pub mod cancellation;
pub mod config;
pub mod consumer;
pub mod drain;
pub mod producer;
pub mod receive_loop;
pub mod shutdown;

pub use cancellation::CancellationSignal;
pub use config::{
    BridgeConfig, BridgeConfigError, DrainSettings, LoggingSettings, QueueProviderKind,
    QueueSettings, ReceiveSettings, ServerSettings,
};
pub use consumer::{ConsumerError, ConsumerExit, ConsumerService};
pub use drain::{DrainError, DrainReport, DrainService};
pub use producer::{EnqueueError, EnqueueReport, ProducerService};
pub use receive_loop::{
    LoopConfig, LoopError, LoopMode, LoopResult, ReceiveLoop, ReceiveOutcome, TransientBackoff,
};
pub use shutdown::{cancel_on_shutdown, shutdown_signal};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
