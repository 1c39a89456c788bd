//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a fully functional in-memory queue that mirrors the
//! peek-lock semantics of a real broker:
//! - FIFO delivery ordered by sequence number
//! - Delivery locks that expire and make the message visible again
//! - Delivery counts that grow with every redelivery
//! - Message TTL
//!
//! Clones of an [`InMemoryProvider`] share storage, so a producer and any
//! number of consumers can be wired to the same queues.

use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::message::{Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage, Timestamp};
use crate::provider::{InMemoryConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
struct QueueStorage {
    queues: HashMap<QueueName, InMemoryQueue>,
    next_sequence_number: u64,
}

impl QueueStorage {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            next_sequence_number: 1,
        }
    }

    /// Get or create a queue
    fn get_or_create_queue(&mut self, queue_name: &QueueName) -> &mut InMemoryQueue {
        self.queues.entry(queue_name.clone()).or_default()
    }
}

/// Internal queue state for a single queue
#[derive(Default)]
struct InMemoryQueue {
    /// Visible messages, ordered by sequence number
    messages: VecDeque<StoredMessage>,
    /// Locked messages keyed by lock token
    in_flight: HashMap<String, InFlightMessage>,
}

impl InMemoryQueue {
    fn len(&self) -> usize {
        self.messages.len() + self.in_flight.len()
    }

    /// Put messages whose lock has lapsed back in line
    fn reclaim_expired_locks(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, in_flight)| now >= in_flight.lock_expires_at)
            .map(|(token, _)| token.clone())
            .collect();

        for token in expired {
            if let Some(in_flight) = self.in_flight.remove(&token) {
                trace!(
                    message_id = %in_flight.message.message_id,
                    "Delivery lock expired, message visible again"
                );
                self.requeue(in_flight.message);
            }
        }
    }

    fn requeue(&mut self, message: StoredMessage) {
        let position = self
            .messages
            .iter()
            .position(|m| m.sequence_number > message.sequence_number)
            .unwrap_or(self.messages.len());
        self.messages.insert(position, message);
    }

    /// Earliest instant at which a locked message becomes visible again
    fn next_lock_expiry(&self) -> Option<Instant> {
        self.in_flight.values().map(|m| m.lock_expires_at).min()
    }
}

/// A message stored in the queue with metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    attributes: HashMap<String, String>,
    correlation_id: Option<String>,
    sequence_number: u64,
    delivery_count: u32,
    expires_at: Option<Instant>,
}

impl StoredMessage {
    fn from_message(message: &Message, message_id: MessageId, sequence_number: u64) -> Self {
        let expires_at = message
            .time_to_live
            .and_then(|ttl| Instant::now().checked_add(ttl));

        Self {
            message_id,
            body: message.body.clone(),
            attributes: message.attributes.clone(),
            correlation_id: message.correlation_id.clone(),
            sequence_number,
            delivery_count: 0,
            expires_at,
        }
    }

    /// Check if message is expired based on TTL
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// A message currently locked to a receiver
struct InFlightMessage {
    message: StoredMessage,
    lock_expires_at: Instant,
}

/// Outcome of a single non-blocking receive attempt
enum LockAttempt {
    Locked(ReceivedMessage),
    /// Nothing visible; `next_expiry` is when a locked message reappears
    Idle { next_expiry: Option<Instant> },
}

// ============================================================================
// InMemoryProvider
// ============================================================================

struct Shared {
    storage: RwLock<QueueStorage>,
    arrivals: Notify,
    config: InMemoryConfig,
}

/// In-memory queue provider implementation
#[derive(Clone)]
pub struct InMemoryProvider {
    shared: Arc<Shared>,
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                storage: RwLock::new(QueueStorage::new()),
                arrivals: Notify::new(),
                config,
            }),
        }
    }

    /// Number of messages in the queue, locked or visible
    pub fn message_count(&self, queue: &QueueName) -> usize {
        self.shared
            .storage
            .read()
            .map(|storage| storage.queues.get(queue).map_or(0, InMemoryQueue::len))
            .unwrap_or(0)
    }

    /// Number of messages currently locked to a receiver
    pub fn in_flight_count(&self, queue: &QueueName) -> usize {
        self.shared
            .storage
            .read()
            .map(|storage| storage.queues.get(queue).map_or(0, |q| q.in_flight.len()))
            .unwrap_or(0)
    }

    fn storage(&self) -> Result<RwLockWriteGuard<'_, QueueStorage>, QueueError> {
        self.shared
            .storage
            .write()
            .map_err(|_| QueueError::ProviderError {
                provider: ProviderType::InMemory.to_string(),
                code: "StoragePoisoned".to_string(),
                message: "queue storage lock poisoned".to_string(),
                transient: false,
            })
    }

    /// Lock the next visible message, if any
    fn try_lock_next(&self, queue: &QueueName) -> Result<LockAttempt, QueueError> {
        let mut storage = self.storage()?;
        let lock_duration = self.shared.config.lock_duration;
        let now = Instant::now();
        let q = storage.get_or_create_queue(queue);

        q.reclaim_expired_locks(now);

        while let Some(mut message) = q.messages.pop_front() {
            if message.is_expired(now) {
                debug!(message_id = %message.message_id, "Dropping expired message");
                continue;
            }

            message.delivery_count += 1;
            let lock_token = uuid::Uuid::new_v4().to_string();
            let received = ReceivedMessage {
                message_id: message.message_id.clone(),
                body: message.body.clone(),
                attributes: message.attributes.clone(),
                correlation_id: message.correlation_id.clone(),
                receipt_handle: ReceiptHandle::new(
                    lock_token.clone(),
                    Timestamp::after(lock_duration),
                    ProviderType::InMemory,
                ),
                delivery_count: message.delivery_count,
                sequence_number: Some(message.sequence_number),
                delivered_at: Timestamp::now(),
            };

            q.in_flight.insert(
                lock_token,
                InFlightMessage {
                    message,
                    lock_expires_at: now + lock_duration,
                },
            );

            return Ok(LockAttempt::Locked(received));
        }

        Ok(LockAttempt::Idle {
            next_expiry: q.next_lock_expiry(),
        })
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

impl std::fmt::Debug for InMemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryProvider")
            .field("config", &self.shared.config)
            .finish()
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        let max_size = self.shared.config.max_message_size;
        if message.body.len() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: message.body.len(),
                max_size,
            });
        }

        let message_id = MessageId::new();
        {
            let mut storage = self.storage()?;
            let sequence_number = storage.next_sequence_number;
            let capacity = self.shared.config.max_queue_size;
            let q = storage.get_or_create_queue(queue);

            if q.len() >= capacity {
                return Err(QueueError::QueueFull {
                    queue_name: queue.to_string(),
                    capacity,
                });
            }

            q.messages.push_back(StoredMessage::from_message(
                message,
                message_id.clone(),
                sequence_number,
            ));
            storage.next_sequence_number += 1;
        }

        self.shared.arrivals.notify_waiters();
        Ok(message_id)
    }

    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30));

        loop {
            // Register interest before looking so a send between the check
            // and the wait is not missed.
            let arrival = self.shared.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            let next_expiry = match self.try_lock_next(queue)? {
                LockAttempt::Locked(received) => return Ok(Some(received)),
                LockAttempt::Idle { next_expiry } => next_expiry,
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }

            let wake_at = next_expiry.map_or(deadline, |expiry| expiry.min(deadline));
            tokio::select! {
                _ = &mut arrival => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut storage = self.storage()?;
        let now = Instant::now();

        for q in storage.queues.values_mut() {
            q.reclaim_expired_locks(now);
            if q.in_flight.remove(receipt.handle()).is_some() {
                return Ok(());
            }
        }

        Err(QueueError::MessageNotFound {
            receipt: receipt.handle().to_string(),
        })
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}
