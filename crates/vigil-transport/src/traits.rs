//! Transport abstraction traits for Vigil.
//!
//! A transport opens a connection to the broker. The connection is split in
//! two: the inbound half ([`Connection`]) is owned by a single dispatch task
//! and yields [`TransportEvent`]s in delivery order, while the outbound half
//! ([`ClientHandle`]) is shared and safe to call concurrently.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Client identifier presented to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl ClientId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a client ID unique to this process and moment.
    #[must_use]
    pub fn generate() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Self(format!("vigil_{:x}", timestamp & 0xffff_ffff_ffff))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Broker URL could not be understood.
    #[error("Invalid broker endpoint: {0}")]
    InvalidEndpoint(String),

    /// Subscribe request failed.
    #[error("Subscribe to {topic} failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    /// Failed to publish.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// The broker client reported an error.
    #[error("Client error: {0}")]
    Client(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Something the broker connection reports.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The broker accepted the connection.
    Connected,
    /// A message arrived on a subscribed topic.
    Message { topic: String, payload: Bytes },
    /// The broker or network ended the connection.
    Disconnected,
}

/// A transport that can open broker connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection.
    ///
    /// The connection may still be handshaking when this returns; it reports
    /// [`TransportEvent::Connected`] once the broker accepts it.
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "mqtt", "loopback").
    fn name(&self) -> &'static str;
}

/// The inbound half of a broker connection.
#[async_trait]
pub trait Connection: Send {
    /// Get the client identifier.
    fn id(&self) -> &ClientId;

    /// Receive the next event.
    ///
    /// Returns `None` once the connection has been closed locally.
    async fn recv(&mut self) -> Result<Option<TransportEvent>, TransportError>;

    /// The shared outbound handle for this connection.
    fn handle(&self) -> Arc<dyn ClientHandle>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

/// The outbound half of a broker connection.
///
/// Implementations must allow concurrent calls without external locking.
#[async_trait]
pub trait ClientHandle: Send + Sync {
    /// Subscribe to a topic.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Publish a payload to a topic.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Close the connection. Closing twice is not an error.
    async fn close(&self) -> Result<(), TransportError>;
}
