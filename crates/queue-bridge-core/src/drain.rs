//! Drain: empty a queue within a bounded time.

use crate::cancellation::CancellationSignal;
use crate::receive_loop::{LoopConfig, LoopError, LoopMode, LoopResult, ReceiveLoop};
use bus_runtime::{QueueClient, QueueName};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

#[cfg(test)]
#[path = "drain_tests.rs"]
mod tests;

/// Summary of a successful drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub acknowledged: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum DrainError {
    #[error("drain failed after acknowledging {acknowledged} messages: {source}")]
    Failed {
        acknowledged: u64,
        #[source]
        source: LoopError,
    },

    #[error("drain cancelled after acknowledging {acknowledged} messages")]
    Cancelled { acknowledged: u64 },
}

impl DrainError {
    pub fn acknowledged(&self) -> u64 {
        match self {
            Self::Failed { acknowledged, .. } | Self::Cancelled { acknowledged } => *acknowledged,
        }
    }
}

/// Empties a queue under a fixed wall-clock deadline.
///
/// A receive wait that reaches the deadline with nothing delivered means the
/// queue is empty and the drain succeeded. Drains may run concurrently with
/// each other and with a consumer; the broker decides who gets each message.
pub struct DrainService {
    client: Arc<dyn QueueClient>,
    queue: QueueName,
    config: LoopConfig,
}

impl DrainService {
    pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

    /// Drain service using `config`'s timeouts; the mode is always bounded drain
    pub fn new(client: Arc<dyn QueueClient>, queue: QueueName, config: LoopConfig) -> Self {
        Self {
            client,
            queue,
            config: LoopConfig {
                mode: LoopMode::BoundedDrain,
                ..config
            },
        }
    }

    /// Drain service with default timeouts and the given deadline
    pub fn with_deadline(client: Arc<dyn QueueClient>, queue: QueueName, deadline: Duration) -> Self {
        Self::new(client, queue, LoopConfig::bounded_drain(deadline))
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.config.overall_deadline
    }

    /// Drain the queue; nothing outside can cancel this run
    pub async fn drain(&self) -> Result<DrainReport, DrainError> {
        self.drain_with_cancel(&CancellationSignal::new()).await
    }

    /// Drain the queue, stopping early if `cancel` is set
    #[instrument(skip(self, cancel), fields(queue = %self.queue))]
    pub async fn drain_with_cancel(
        &self,
        cancel: &CancellationSignal,
    ) -> Result<DrainReport, DrainError> {
        let started = Instant::now();

        match ReceiveLoop::run(self.client.as_ref(), &self.queue, &self.config, cancel).await {
            LoopResult::Drained { acknowledged } => {
                let elapsed = started.elapsed();
                info!(
                    acknowledged,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Drain complete"
                );
                Ok(DrainReport {
                    acknowledged,
                    elapsed,
                })
            }
            LoopResult::Cancelled { acknowledged } => {
                warn!(acknowledged, "Drain cancelled");
                Err(DrainError::Cancelled { acknowledged })
            }
            LoopResult::Failed {
                acknowledged,
                cause,
            } => {
                warn!(acknowledged, error = %cause, "Drain failed");
                Err(DrainError::Failed {
                    acknowledged,
                    source: cause,
                })
            }
        }
    }
}
