//! # Receive Loop
//!
//! The state machine that drives repeated receive and acknowledge cycles
//! against a queue until the queue is drained, the caller cancels, or a
//! failure ends the loop.
//!
//! Every cycle goes through the same steps:
//!
//! 1. Check the [`CancellationSignal`]. If set, end with
//!    [`LoopResult::Cancelled`].
//! 2. Issue one receive attempt bounded by the per-attempt timeout (or, in
//!    [`LoopMode::BoundedDrain`], by what is left of the overall deadline).
//!    The client gets `receive_grace` on top of that window to answer; a
//!    client that still has not answered is a transient timeout, never an
//!    empty queue.
//! 3. Classify the attempt as a [`ReceiveOutcome`] and act on it:
//!    - `Received`: acknowledge before going back to step 1
//!    - `Empty`: idle tick in continuous modes, success in bounded drain
//!      (only when the client's own wait ran out with nothing delivered)
//!    - `TransientError`: retry until the consecutive-failure budget runs out
//!    - `FatalError`: end with [`LoopResult::Failed`]
//!
//! Cancellation is only sampled at step 1, so a message that has been
//! received is always acknowledged (or the loop fails) before the loop can
//! stop.

use crate::cancellation::CancellationSignal;
use bus_runtime::{MessageId, QueueClient, QueueError, QueueName, ReceivedMessage};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "receive_loop_tests.rs"]
mod tests;

// ============================================================================
// Configuration
// ============================================================================

/// How the loop decides it is finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Run until cancelled; an empty queue is an idle tick
    Continuous,
    /// Like `Continuous`, but stop after the first acknowledged message
    ReceiveOnce,
    /// Run until the queue is observed empty or the overall deadline passes
    BoundedDrain,
}

impl std::fmt::Display for LoopMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continuous => write!(f, "continuous"),
            Self::ReceiveOnce => write!(f, "receive-once"),
            Self::BoundedDrain => write!(f, "bounded-drain"),
        }
    }
}

/// Exponential delay between consecutive transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransientBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl TransientBackoff {
    /// No delay between retries
    pub const NONE: Self = Self {
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };

    /// Delay before retry number `attempt` (1-based), doubling each time
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for TransientBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Parameters for one run of the [`ReceiveLoop`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    pub mode: LoopMode,
    /// Upper bound on a single receive attempt
    pub per_attempt_timeout: Duration,
    /// Wall-clock budget for the whole run; only used by `BoundedDrain`
    pub overall_deadline: Option<Duration>,
    /// Extra time a client gets past the attempt window to deliver its answer
    pub receive_grace: Duration,
    /// Upper bound on a single acknowledgment
    pub ack_timeout: Duration,
    /// Consecutive transient receive failures tolerated before failing
    pub transient_budget: u32,
    pub transient_backoff: TransientBackoff,
}

impl LoopConfig {
    pub const DEFAULT_PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_RECEIVE_GRACE: Duration = Duration::from_secs(30);
    pub const DEFAULT_TRANSIENT_BUDGET: u32 = 5;

    fn with_mode(mode: LoopMode, overall_deadline: Option<Duration>) -> Self {
        Self {
            mode,
            per_attempt_timeout: Self::DEFAULT_PER_ATTEMPT_TIMEOUT,
            overall_deadline,
            receive_grace: Self::DEFAULT_RECEIVE_GRACE,
            ack_timeout: Self::DEFAULT_ACK_TIMEOUT,
            transient_budget: Self::DEFAULT_TRANSIENT_BUDGET,
            transient_backoff: TransientBackoff::default(),
        }
    }

    /// Run until cancelled
    pub fn continuous() -> Self {
        Self::with_mode(LoopMode::Continuous, None)
    }

    /// Run until one message has been acknowledged or the caller cancels
    pub fn receive_once() -> Self {
        Self::with_mode(LoopMode::ReceiveOnce, None)
    }

    /// Empty the queue, giving up on waiting after `deadline`
    pub fn bounded_drain(deadline: Duration) -> Self {
        Self::with_mode(LoopMode::BoundedDrain, Some(deadline))
    }

    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    pub fn with_receive_grace(mut self, grace: Duration) -> Self {
        self.receive_grace = grace;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_transient_budget(mut self, budget: u32) -> Self {
        self.transient_budget = budget;
        self
    }

    pub fn with_transient_backoff(mut self, backoff: TransientBackoff) -> Self {
        self.transient_backoff = backoff;
        self
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    ///
    /// [`LoopError::InvalidConfig`] when `BoundedDrain` has no overall
    /// deadline, or when any timeout is zero.
    pub fn validate(&self) -> Result<(), LoopError> {
        if self.per_attempt_timeout.is_zero() {
            return Err(LoopError::InvalidConfig {
                message: "per-attempt timeout must be greater than zero".to_string(),
            });
        }

        if self.ack_timeout.is_zero() {
            return Err(LoopError::InvalidConfig {
                message: "acknowledgment timeout must be greater than zero".to_string(),
            });
        }

        if self.mode == LoopMode::BoundedDrain {
            match self.overall_deadline {
                None => {
                    return Err(LoopError::InvalidConfig {
                        message: "bounded drain requires an overall deadline".to_string(),
                    })
                }
                Some(deadline) if deadline.is_zero() => {
                    return Err(LoopError::InvalidConfig {
                        message: "overall deadline must be greater than zero".to_string(),
                    })
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

// ============================================================================
// Outcomes and Results
// ============================================================================

/// Classification of exactly one receive attempt
#[derive(Debug)]
pub enum ReceiveOutcome {
    Received(ReceivedMessage),
    /// The wait reached its deadline with no delivery
    Empty,
    TransientError(QueueError),
    FatalError(QueueError),
}

impl ReceiveOutcome {
    /// Classify what the client returned for one attempt.
    ///
    /// An attempt the client never answered arrives here as
    /// [`QueueError::Timeout`] and is therefore transient.
    pub fn classify(attempt: Result<Option<ReceivedMessage>, QueueError>) -> Self {
        match attempt {
            Ok(None) => Self::Empty,
            Ok(Some(message)) => Self::Received(message),
            Err(e) if e.is_transient() => Self::TransientError(e),
            Err(e) => Self::FatalError(e),
        }
    }
}

/// Reasons a loop run ends in failure
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Receive failed: {0}")]
    Receive(#[source] QueueError),

    #[error("Acknowledgment of message {message_id} failed: {source}")]
    Acknowledge {
        message_id: MessageId,
        #[source]
        source: QueueError,
    },

    #[error("Acknowledgment of message {message_id} did not finish within {timeout:?}")]
    AcknowledgeTimedOut {
        message_id: MessageId,
        timeout: Duration,
    },

    #[error("Gave up after {attempts} consecutive transient receive failures: {last}")]
    TransientBudgetExhausted {
        attempts: u32,
        #[source]
        last: QueueError,
    },

    #[error("Invalid loop configuration: {message}")]
    InvalidConfig { message: String },
}

/// How a loop run ended
#[derive(Debug)]
pub enum LoopResult {
    /// The queue was observed empty (or, for `ReceiveOnce`, a message was
    /// handled)
    Drained { acknowledged: u64 },
    /// The cancellation signal was observed between cycles
    Cancelled { acknowledged: u64 },
    Failed { acknowledged: u64, cause: LoopError },
}

impl LoopResult {
    /// Number of messages acknowledged before the loop ended
    pub fn acknowledged(&self) -> u64 {
        match self {
            Self::Drained { acknowledged }
            | Self::Cancelled { acknowledged }
            | Self::Failed { acknowledged, .. } => *acknowledged,
        }
    }

    pub fn is_drained(&self) -> bool {
        matches!(self, Self::Drained { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

// ============================================================================
// Receive Loop
// ============================================================================

/// Drives receive and acknowledge cycles against one queue
pub struct ReceiveLoop;

impl ReceiveLoop {
    /// Run the loop to completion.
    ///
    /// # Arguments
    ///
    /// * `client` - Queue client; the loop only borrows it
    /// * `queue` - Queue to receive from
    /// * `config` - Mode, timeouts and failure budget
    /// * `cancel` - Checked before every receive attempt
    ///
    /// # Returns
    ///
    /// A [`LoopResult`] carrying the number of acknowledged messages. An
    /// invalid `config` fails immediately without contacting the broker.
    pub async fn run(
        client: &dyn QueueClient,
        queue: &QueueName,
        config: &LoopConfig,
        cancel: &CancellationSignal,
    ) -> LoopResult {
        if let Err(cause) = config.validate() {
            return LoopResult::Failed {
                acknowledged: 0,
                cause,
            };
        }

        let deadline = match config.mode {
            LoopMode::BoundedDrain => config
                .overall_deadline
                .map(|d| Instant::now().checked_add(d).unwrap_or_else(far_future)),
            LoopMode::Continuous | LoopMode::ReceiveOnce => None,
        };

        debug!(queue = %queue, mode = %config.mode, "Starting receive loop");

        let mut acknowledged: u64 = 0;
        let mut consecutive_transient: u32 = 0;
        let mut last_transient: Option<QueueError> = None;

        loop {
            if cancel.is_cancelled() {
                info!(queue = %queue, acknowledged, "Receive loop cancelled");
                return LoopResult::Cancelled { acknowledged };
            }

            let Some(outcome) = Self::receive_attempt(client, queue, config, deadline).await else {
                // Deadline passed between attempts. Only a clean previous
                // cycle lets this count as drained.
                if let Some(last) = last_transient {
                    warn!(
                        queue = %queue,
                        error = %last,
                        "Drain deadline passed while the broker was failing"
                    );
                    return LoopResult::Failed {
                        acknowledged,
                        cause: LoopError::Receive(last),
                    };
                }
                info!(queue = %queue, acknowledged, "Drain deadline reached");
                return LoopResult::Drained { acknowledged };
            };

            match outcome {
                ReceiveOutcome::Received(message) => {
                    consecutive_transient = 0;
                    last_transient = None;
                    info!(
                        message_id = %message.message_id,
                        delivery_count = message.delivery_count,
                        body = %message.body_text(),
                        "Received message"
                    );

                    if let Err(cause) = Self::acknowledge(client, message, config.ack_timeout).await
                    {
                        warn!(queue = %queue, error = %cause, "Acknowledgment failed");
                        return LoopResult::Failed {
                            acknowledged,
                            cause,
                        };
                    }
                    acknowledged += 1;

                    if config.mode == LoopMode::ReceiveOnce {
                        return LoopResult::Drained { acknowledged };
                    }
                }
                ReceiveOutcome::Empty => {
                    consecutive_transient = 0;
                    last_transient = None;
                    if config.mode == LoopMode::BoundedDrain {
                        info!(queue = %queue, acknowledged, "Queue drained");
                        return LoopResult::Drained { acknowledged };
                    }
                    debug!(queue = %queue, "No message available");
                }
                ReceiveOutcome::TransientError(e) => {
                    consecutive_transient += 1;
                    if consecutive_transient > config.transient_budget {
                        warn!(
                            queue = %queue,
                            attempts = consecutive_transient,
                            error = %e,
                            "Transient failure budget exhausted"
                        );
                        return LoopResult::Failed {
                            acknowledged,
                            cause: LoopError::TransientBudgetExhausted {
                                attempts: consecutive_transient,
                                last: e,
                            },
                        };
                    }

                    let delay = config.transient_backoff.delay_for(consecutive_transient);
                    warn!(
                        queue = %queue,
                        attempt = consecutive_transient,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient receive failure, retrying"
                    );
                    last_transient = Some(e);
                    Self::pause(delay, deadline).await;
                }
                ReceiveOutcome::FatalError(e) => {
                    warn!(queue = %queue, error = %e, "Receive failed");
                    return LoopResult::Failed {
                        acknowledged,
                        cause: LoopError::Receive(e),
                    };
                }
            }
        }
    }

    /// One receive attempt, bounded by the attempt window.
    ///
    /// Returns `None` without contacting the broker when the overall deadline
    /// has already passed.
    async fn receive_attempt(
        client: &dyn QueueClient,
        queue: &QueueName,
        config: &LoopConfig,
        deadline: Option<Instant>,
    ) -> Option<ReceiveOutcome> {
        let window = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return None;
                }
                remaining.min(config.per_attempt_timeout)
            }
            None => config.per_attempt_timeout,
        };

        // The client enforces `window` itself; the outer bound only catches
        // a client that never answers.
        let limit = window.saturating_add(config.receive_grace);
        let attempt = tokio::time::timeout(limit, client.receive_message(queue, window))
            .await
            .unwrap_or_else(|_| Err(QueueError::Timeout { duration: limit }));

        Some(ReceiveOutcome::classify(attempt))
    }

    async fn acknowledge(
        client: &dyn QueueClient,
        message: ReceivedMessage,
        timeout: Duration,
    ) -> Result<(), LoopError> {
        let message_id = message.message_id;

        match tokio::time::timeout(timeout, client.complete_message(message.receipt_handle)).await
        {
            Ok(Ok(())) => {
                debug!(message_id = %message_id, "Message acknowledged");
                Ok(())
            }
            Ok(Err(source)) => Err(LoopError::Acknowledge { message_id, source }),
            Err(_) => Err(LoopError::AcknowledgeTimedOut {
                message_id,
                timeout,
            }),
        }
    }

    /// Sleep before a retry without overrunning the overall deadline
    async fn pause(delay: Duration, deadline: Option<Instant>) {
        let delay = match deadline {
            Some(deadline) => delay.min(deadline.saturating_duration_since(Instant::now())),
            None => delay,
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Roughly thirty years out; `Instant` has no maximum constant
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}
