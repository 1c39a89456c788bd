//! Azure Service Bus provider implementation.
//!
//! Talks to the Service Bus REST surface directly:
//! - `POST {queue}/messages` sends a message
//! - `POST {queue}/messages/head?timeout=N` peek-locks the next message
//! - `DELETE {queue}/messages/{id}/{lock-token}` completes a locked message
//!
//! Requests are authorised with Shared Access Signature tokens derived from
//! the namespace connection string. Tokens are cached and regenerated shortly
//! before they expire.
//!
//! ## Example
//!
//! ```no_run
//! use bus_runtime::{AzureServiceBusConfig, ProviderConfig, QueueClientFactory, QueueConfig, Secret};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = QueueConfig {
//!     provider: ProviderConfig::AzureServiceBus(AzureServiceBusConfig::new(Secret::new(
//!         "Endpoint=sb://example.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=...",
//!     ))),
//! };
//!
//! let client = QueueClientFactory::create_client(config).await?;
//! # Ok(())
//! # }
//! ```

use crate::client::QueueProvider;
use crate::error::{ConfigurationError, QueueError, SerializationError};
use crate::message::{Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage, Timestamp};
use crate::provider::{AzureServiceBusConfig, ProviderType, Secret};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use url::Url;

#[cfg(test)]
#[path = "azure_tests.rs"]
mod tests;

/// Lock duration Service Bus applies when a queue is created with defaults
const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(60);

/// Tokens are regenerated once they are this close to expiry
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

const BROKER_PROPERTIES_HEADER: &str = "brokerproperties";

// ============================================================================
// Error Types
// ============================================================================

/// Azure Service Bus specific errors
#[derive(Debug, thiserror::Error)]
pub enum AzureError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Messaging entity not found: {0}")]
    EntityNotFound(String),

    #[error("Message lock lost: {0}")]
    MessageLockLost(String),

    #[error("Message of {size} bytes rejected as too large")]
    MessageTooLarge { size: usize },

    #[error("Service Bus error ({status}): {message}")]
    ServiceBusError { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AzureError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::AuthenticationError(_) => false,
            Self::NetworkError(_) => true,
            Self::Timeout(_) => true,
            Self::EntityNotFound(_) => false,
            Self::MessageLockLost(_) => false,
            Self::MessageTooLarge { .. } => false,
            Self::ServiceBusError { status, .. } => *status == 429 || *status >= 500,
            Self::ConfigurationError(_) => false,
            Self::SerializationError(_) => false,
        }
    }

    /// Map Azure error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        let transient = self.is_transient();
        match self {
            Self::AuthenticationError(msg) => QueueError::AuthenticationFailed { message: msg },
            Self::NetworkError(msg) => QueueError::ConnectionFailed { message: msg },
            Self::Timeout(duration) => QueueError::Timeout { duration },
            Self::EntityNotFound(queue_name) => QueueError::QueueNotFound { queue_name },
            Self::MessageLockLost(receipt) => QueueError::MessageNotFound { receipt },
            Self::MessageTooLarge { size } => QueueError::MessageTooLarge {
                size,
                max_size: ProviderType::AzureServiceBus.max_message_size(),
            },
            Self::ServiceBusError { status, message } => QueueError::ProviderError {
                provider: ProviderType::AzureServiceBus.to_string(),
                code: status.to_string(),
                message,
                transient,
            },
            Self::ConfigurationError(message) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message })
            }
            Self::SerializationError(message) => {
                QueueError::SerializationError(SerializationError::InvalidHeader {
                    header: BROKER_PROPERTIES_HEADER.to_string(),
                    message,
                })
            }
        }
    }
}

// ============================================================================
// Connection String
// ============================================================================

/// Parsed Service Bus namespace connection string
///
/// Only Shared Access Key credentials are supported.
#[derive(Clone)]
pub struct ConnectionString {
    endpoint: Url,
    key_name: String,
    key: Secret,
    entity_path: Option<String>,
}

impl ConnectionString {
    /// Namespace base URL, always ending in `/`
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Name of the shared access policy
    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// Queue the connection string is scoped to, if any
    pub fn entity_path(&self) -> Option<&str> {
        self.entity_path.as_deref()
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint.as_str())
            .field("key_name", &self.key_name)
            .field("key", &"<REDACTED>")
            .field("entity_path", &self.entity_path)
            .finish()
    }
}

impl FromStr for ConnectionString {
    type Err = AzureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut entity_path = None;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // Keys end at the first '='; base64 keys carry their own padding.
            let (name, value) = part.split_once('=').ok_or_else(|| {
                AzureError::ConfigurationError(
                    "Malformed connection string segment".to_string(),
                )
            })?;

            match name.to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value.to_string()),
                "sharedaccesskeyname" => key_name = Some(value.to_string()),
                "sharedaccesskey" => key = Some(Secret::new(value)),
                "entitypath" => entity_path = Some(value.to_string()),
                _ => debug!(segment = name, "Ignoring connection string segment"),
            }
        }

        let endpoint = endpoint.ok_or_else(|| {
            AzureError::ConfigurationError("Connection string is missing Endpoint".to_string())
        })?;
        let key_name = key_name.ok_or_else(|| {
            AzureError::ConfigurationError(
                "Connection string is missing SharedAccessKeyName".to_string(),
            )
        })?;
        let key = key.ok_or_else(|| {
            AzureError::ConfigurationError(
                "Connection string is missing SharedAccessKey".to_string(),
            )
        })?;

        Ok(Self {
            endpoint: normalize_endpoint(&endpoint)?,
            key_name,
            key,
            entity_path,
        })
    }
}

/// Convert `sb://host/` to `https://host/`; plain http(s) endpoints pass through
fn normalize_endpoint(raw: &str) -> Result<Url, AzureError> {
    let mut url = Url::parse(raw)
        .map_err(|e| AzureError::ConfigurationError(format!("Invalid Endpoint: {}", e)))?;

    match url.scheme() {
        "sb" => {
            let rewritten = format!("https{}", &url.as_str()["sb".len()..]);
            url = Url::parse(&rewritten)
                .map_err(|e| AzureError::ConfigurationError(format!("Invalid Endpoint: {}", e)))?;
        }
        "http" | "https" => {}
        other => {
            return Err(AzureError::ConfigurationError(format!(
                "Unsupported Endpoint scheme '{}'",
                other
            )))
        }
    }

    if url.host_str().is_none() {
        return Err(AzureError::ConfigurationError(
            "Endpoint has no host".to_string(),
        ));
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

// ============================================================================
// Shared Access Signature Tokens
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// Generates and caches SAS tokens for a namespace
///
/// A token is scoped to the namespace root so one token authorises every
/// queue in it.
struct SasTokenProvider {
    resource_uri: String,
    key_name: String,
    key: Secret,
    ttl: Duration,
    cached: RwLock<Option<CachedToken>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl SasTokenProvider {
    fn new(connection: &ConnectionString, ttl: Duration) -> Self {
        Self {
            resource_uri: connection.endpoint.as_str().to_string(),
            key_name: connection.key_name.clone(),
            key: connection.key.clone(),
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Current token, regenerating it when missing or close to expiry
    async fn token(&self) -> Result<String, AzureError> {
        let now = Utc::now();
        let margin = chrono::Duration::from_std(TOKEN_REFRESH_MARGIN)
            .unwrap_or(chrono::Duration::zero());

        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.expires_at - margin > now {
                return Ok(cached.token.clone());
            }
        }

        let mut slot = self.cached.write().await;
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| AzureError::ConfigurationError(format!("Invalid token TTL: {}", e)))?;
        let expires_at = now + ttl;
        let token = self.sign(expires_at.timestamp())?;

        debug!(expires_at = %expires_at, "Generated Service Bus SAS token");
        *slot = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });

        Ok(token)
    }

    /// Build a token valid until the given unix timestamp
    fn sign(&self, expiry: i64) -> Result<String, AzureError> {
        let encoded_uri = urlencoding::encode(&self.resource_uri.to_lowercase()).into_owned();
        let string_to_sign = format!("{}\n{}", encoded_uri, expiry);

        let mut mac = HmacSha256::new_from_slice(self.key.expose_secret().as_bytes())
            .map_err(|e| AzureError::ConfigurationError(format!("Invalid access key: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        let signature =
            base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        Ok(format!(
            "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
            encoded_uri,
            urlencoding::encode(&signature),
            expiry,
            urlencoding::encode(&self.key_name)
        ))
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// Broker-assigned properties carried in the `BrokerProperties` header
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BrokerProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_to_live: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lock_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    locked_until_utc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delivery_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_number: Option<u64>,
}

/// Whole seconds for the `timeout` query parameter.
///
/// Rounds down so the broker never holds the request past the caller's
/// window; a sub-second window becomes `0`, an immediate answer.
fn receive_timeout_secs(timeout: Duration) -> u64 {
    timeout.as_secs()
}

/// Parse `LockedUntilUtc`, which Service Bus renders in RFC 1123 form
fn parse_locked_until(value: &str) -> Option<Timestamp> {
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|dt| Timestamp::from_datetime(dt.with_timezone(&Utc)))
}

// ============================================================================
// Azure Service Bus Provider
// ============================================================================

/// Azure Service Bus queue provider implementation
pub struct AzureServiceBusProvider {
    config: AzureServiceBusConfig,
    endpoint: Url,
    http_client: HttpClient,
    tokens: SasTokenProvider,
}

impl AzureServiceBusProvider {
    /// Create new Azure Service Bus provider
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::ConfigurationError`] when the connection string
    /// cannot be parsed or the HTTP client cannot be built.
    pub async fn new(config: AzureServiceBusConfig) -> Result<Self, AzureError> {
        let connection: ConnectionString = config.connection_string.expose_secret().parse()?;

        let http_client = HttpClient::builder()
            .user_agent(concat!("bus-runtime/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                AzureError::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;

        debug!(
            endpoint = %connection.endpoint,
            key_name = %connection.key_name,
            "Created Azure Service Bus provider"
        );

        Ok(Self {
            endpoint: connection.endpoint.clone(),
            tokens: SasTokenProvider::new(&connection, config.sas_token_ttl),
            http_client,
            config,
        })
    }

    fn url(&self, path: &str) -> Result<Url, AzureError> {
        self.endpoint
            .join(path)
            .map_err(|e| AzureError::ConfigurationError(format!("Invalid request path: {}", e)))
    }

    /// Send an authorised request and return the raw response
    async fn make_request(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Bytes,
        timeout: Duration,
    ) -> Result<reqwest::Response, AzureError> {
        let token = self.tokens.token().await?;

        self.http_client
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, token)
            .headers(headers)
            .body(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AzureError::Timeout(timeout)
                } else if e.is_connect() {
                    AzureError::NetworkError(format!("Connection failed: {}", e))
                } else {
                    AzureError::NetworkError(format!("HTTP request failed: {}", e))
                }
            })
    }

    /// Classify a non-success response
    async fn parse_error_response(response: reqwest::Response, entity: &str) -> AzureError {
        let status = response.status();
        let detail = response.text().await.unwrap_or_default();
        let detail = detail.trim().to_string();

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                AzureError::AuthenticationError(format!("{}: {}", status, detail))
            }
            StatusCode::NOT_FOUND => AzureError::EntityNotFound(entity.to_string()),
            StatusCode::GONE => AzureError::MessageLockLost(entity.to_string()),
            _ => AzureError::ServiceBusError {
                status: status.as_u16(),
                message: detail,
            },
        }
    }

    fn build_send_headers(
        message: &Message,
        message_id: &MessageId,
    ) -> Result<HeaderMap, AzureError> {
        let properties = BrokerProperties {
            message_id: Some(message_id.to_string()),
            correlation_id: message.correlation_id.clone(),
            time_to_live: message.time_to_live.map(|ttl| ttl.as_secs_f64()),
            ..Default::default()
        };
        let properties = serde_json::to_string(&properties)
            .map_err(|e| AzureError::SerializationError(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(
            BROKER_PROPERTIES_HEADER,
            HeaderValue::from_str(&properties)
                .map_err(|e| AzureError::SerializationError(e.to_string()))?,
        );

        // Custom properties travel as headers with JSON-quoted values.
        for (key, value) in &message.attributes {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                AzureError::SerializationError(format!("Invalid attribute name '{}': {}", key, e))
            })?;
            let quoted = serde_json::to_string(value)
                .map_err(|e| AzureError::SerializationError(e.to_string()))?;
            let value = HeaderValue::from_str(&quoted).map_err(|e| {
                AzureError::SerializationError(format!("Invalid attribute value: {}", e))
            })?;
            headers.insert(name, value);
        }

        Ok(headers)
    }

    fn parse_received(
        &self,
        queue: &QueueName,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<ReceivedMessage, AzureError> {
        let raw = headers
            .get(BROKER_PROPERTIES_HEADER)
            .ok_or_else(|| {
                AzureError::SerializationError("Missing BrokerProperties header".to_string())
            })?
            .to_str()
            .map_err(|e| AzureError::SerializationError(e.to_string()))?;
        let properties: BrokerProperties = serde_json::from_str(raw)
            .map_err(|e| AzureError::SerializationError(format!("BrokerProperties: {}", e)))?;

        let message_id = properties
            .message_id
            .ok_or_else(|| AzureError::SerializationError("Missing MessageId".to_string()))?;
        let lock_token = properties
            .lock_token
            .ok_or_else(|| AzureError::SerializationError("Missing LockToken".to_string()))?;

        let expires_at = match properties.locked_until_utc.as_deref() {
            Some(value) => parse_locked_until(value).unwrap_or_else(|| {
                warn!(value, "Unparseable LockedUntilUtc, assuming default lock");
                Timestamp::after(DEFAULT_LOCK_DURATION)
            }),
            None => Timestamp::after(DEFAULT_LOCK_DURATION),
        };

        let attributes = headers
            .iter()
            .filter(|(name, _)| name.as_str() != BROKER_PROPERTIES_HEADER)
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                let unquoted: String = serde_json::from_str(value).ok()?;
                Some((name.as_str().to_string(), unquoted))
            })
            .collect::<HashMap<_, _>>();

        // The receipt is the path that completes this particular delivery.
        let receipt_path = format!(
            "{}/messages/{}/{}",
            queue.as_str(),
            urlencoding::encode(&message_id),
            urlencoding::encode(&lock_token)
        );

        Ok(ReceivedMessage {
            message_id: MessageId::from_str(&message_id)
                .map_err(|e| AzureError::SerializationError(e.to_string()))?,
            body,
            attributes,
            correlation_id: properties.correlation_id,
            receipt_handle: ReceiptHandle::new(
                receipt_path,
                expires_at,
                ProviderType::AzureServiceBus,
            ),
            delivery_count: properties.delivery_count.unwrap_or(1),
            sequence_number: properties.sequence_number,
            delivered_at: Timestamp::now(),
        })
    }

    async fn send(&self, queue: &QueueName, message: &Message) -> Result<MessageId, AzureError> {
        let url = self.url(&format!("{}/messages", queue.as_str()))?;
        let message_id = MessageId::new();
        let headers = Self::build_send_headers(message, &message_id)?;

        let response = self
            .make_request(
                Method::POST,
                url,
                headers,
                message.body.clone(),
                self.config.request_timeout,
            )
            .await?;

        match response.status() {
            StatusCode::CREATED => Ok(message_id),
            StatusCode::PAYLOAD_TOO_LARGE => Err(AzureError::MessageTooLarge {
                size: message.body.len(),
            }),
            _ => Err(Self::parse_error_response(response, queue.as_str()).await),
        }
    }

    async fn receive(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, AzureError> {
        let wait_secs = receive_timeout_secs(timeout);
        let mut url = self.url(&format!("{}/messages/head", queue.as_str()))?;
        url.query_pairs_mut()
            .append_pair("timeout", &wait_secs.to_string());

        let response = self
            .make_request(
                Method::POST,
                url,
                HeaderMap::new(),
                Bytes::new(),
                Duration::from_secs(wait_secs) + self.config.request_timeout,
            )
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                let headers = response.headers().clone();
                let body = response.bytes().await.map_err(|e| {
                    AzureError::NetworkError(format!("Failed to read message body: {}", e))
                })?;
                self.parse_received(queue, &headers, body).map(Some)
            }
            StatusCode::NO_CONTENT => Ok(None),
            _ => Err(Self::parse_error_response(response, queue.as_str()).await),
        }
    }

    async fn complete(&self, receipt: &ReceiptHandle) -> Result<(), AzureError> {
        let url = self.url(receipt.handle())?;

        let response = self
            .make_request(
                Method::DELETE,
                url,
                HeaderMap::new(),
                Bytes::new(),
                self.config.request_timeout,
            )
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(AzureError::MessageLockLost(receipt.handle().to_string()))
            }
            _ => Err(Self::parse_error_response(response, receipt.handle()).await),
        }
    }
}

impl fmt::Debug for AzureServiceBusProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureServiceBusProvider")
            .field("endpoint", &self.endpoint.as_str())
            .field("request_timeout", &self.config.request_timeout)
            .finish()
    }
}

#[async_trait]
impl QueueProvider for AzureServiceBusProvider {
    #[instrument(skip(self, message), fields(queue = %queue))]
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        self.send(queue, message)
            .await
            .map_err(AzureError::to_queue_error)
    }

    #[instrument(skip(self), fields(queue = %queue))]
    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        self.receive(queue, timeout)
            .await
            .map_err(AzureError::to_queue_error)
    }

    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.complete(receipt)
            .await
            .map_err(AzureError::to_queue_error)
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureServiceBus
    }
}
