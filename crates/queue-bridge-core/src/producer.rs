//! Producer: enqueue a batch of labelled messages.

use bus_runtime::{Message, QueueClient, QueueError, QueueName};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;

/// Outcome of a fully successful [`ProducerService::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueReport {
    pub sent: u32,
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    /// Sending stopped at message `sent + 1`. Messages `1..=sent` stay queued.
    #[error("sent {sent} of {requested} messages")]
    PartialSend {
        sent: u32,
        requested: u32,
        #[source]
        source: QueueError,
    },
}

impl EnqueueError {
    /// Messages confirmed by the broker before the failure
    pub fn sent(&self) -> u32 {
        match self {
            Self::PartialSend { sent, .. } => *sent,
        }
    }
}

/// Sends synthetic messages to a queue.
///
/// Owns its own client handle for the lifetime of the service.
pub struct ProducerService {
    client: Arc<dyn QueueClient>,
    queue: QueueName,
}

impl ProducerService {
    pub fn new(client: Arc<dyn QueueClient>, queue: QueueName) -> Self {
        Self { client, queue }
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Body of the `index`th message (1-based)
    pub fn message_body(index: u32) -> String {
        format!("Message {}", index)
    }

    /// Send `count` messages one after another.
    ///
    /// Not transactional: a failure at message *k* leaves messages `1..k`
    /// queued and is reported as [`EnqueueError::PartialSend`] with
    /// `sent == k - 1`. No further sends are attempted after a failure.
    #[instrument(skip(self), fields(queue = %self.queue))]
    pub async fn enqueue(&self, count: u32) -> Result<EnqueueReport, EnqueueError> {
        for index in 1..=count {
            let message = Message::from_text(Self::message_body(index));

            match self.client.send_message(&self.queue, message).await {
                Ok(message_id) => {
                    debug!(index, message_id = %message_id, "Sent message");
                }
                Err(source) => {
                    warn!(
                        sent = index - 1,
                        requested = count,
                        error = %source,
                        "Send failed, stopping"
                    );
                    return Err(EnqueueError::PartialSend {
                        sent: index - 1,
                        requested: count,
                        source,
                    });
                }
            }
        }

        info!(sent = count, "Enqueued messages");
        Ok(EnqueueReport { sent: count })
    }
}
