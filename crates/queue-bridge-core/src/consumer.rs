//! Consumer: receive and acknowledge until told to stop.

use crate::cancellation::CancellationSignal;
use crate::receive_loop::{LoopConfig, LoopError, LoopMode, LoopResult, ReceiveLoop};
use bus_runtime::{QueueClient, QueueName};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

/// Normal ways a consumer run ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// The cancellation signal was observed between cycles
    Cancelled { acknowledged: u64 },
    /// A receive-once run handled its message
    Completed { acknowledged: u64 },
}

impl ConsumerExit {
    pub fn acknowledged(&self) -> u64 {
        match self {
            Self::Cancelled { acknowledged } | Self::Completed { acknowledged } => *acknowledged,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("consumer stopped after acknowledging {acknowledged} messages: {source}")]
    Loop {
        acknowledged: u64,
        #[source]
        source: LoopError,
    },
}

/// Long-running receiver for one queue.
///
/// Owns its own client handle. Timeouts and the transient budget come from
/// the configuration passed at construction; the mode is chosen per run.
pub struct ConsumerService {
    client: Arc<dyn QueueClient>,
    queue: QueueName,
    config: LoopConfig,
}

impl ConsumerService {
    pub fn new(client: Arc<dyn QueueClient>, queue: QueueName, config: LoopConfig) -> Self {
        Self {
            client,
            queue,
            config,
        }
    }

    /// Receive until `cancel` is set
    #[instrument(skip(self, cancel), fields(queue = %self.queue))]
    pub async fn run(&self, cancel: &CancellationSignal) -> Result<ConsumerExit, ConsumerError> {
        self.run_in_mode(LoopMode::Continuous, cancel).await
    }

    /// Receive until one message has been acknowledged or `cancel` is set
    #[instrument(skip(self, cancel), fields(queue = %self.queue))]
    pub async fn run_once(
        &self,
        cancel: &CancellationSignal,
    ) -> Result<ConsumerExit, ConsumerError> {
        self.run_in_mode(LoopMode::ReceiveOnce, cancel).await
    }

    async fn run_in_mode(
        &self,
        mode: LoopMode,
        cancel: &CancellationSignal,
    ) -> Result<ConsumerExit, ConsumerError> {
        let config = LoopConfig {
            mode,
            overall_deadline: None,
            ..self.config.clone()
        };

        info!(mode = %mode, "Consumer started");

        match ReceiveLoop::run(self.client.as_ref(), &self.queue, &config, cancel).await {
            LoopResult::Cancelled { acknowledged } => {
                info!(acknowledged, "Consumer stopped");
                Ok(ConsumerExit::Cancelled { acknowledged })
            }
            LoopResult::Drained { acknowledged } => {
                info!(acknowledged, "Consumer finished");
                Ok(ConsumerExit::Completed { acknowledged })
            }
            LoopResult::Failed {
                acknowledged,
                cause,
            } => {
                error!(acknowledged, error = %cause, "Consumer failed");
                Err(ConsumerError::Loop {
                    acknowledged,
                    source: cause,
                })
            }
        }
    }
}
