//! MQTT transport implementation.
//!
//! Connects to the broker with rumqttc. The broker URL selects the wire:
//! `wss://` and `ws://` for MQTT over WebSocket, `mqtts://` for TLS and
//! `mqtt://` or `tcp://` for plain TCP.

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::traits::{ClientHandle, ClientId, Connection, Transport, TransportError, TransportEvent};

/// Public broker the dashboard talks to by default.
pub const DEFAULT_BROKER_URL: &str = "wss://broker.hivemq.com:8884/mqtt";

/// Wire used to reach the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl Scheme {
    fn default_port(self) -> u16 {
        match self {
            Scheme::Tcp => 1883,
            Scheme::Tls => 8883,
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        }
    }

    fn is_websocket(self) -> bool {
        matches!(self, Scheme::Ws | Scheme::Wss)
    }
}

/// A parsed broker URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Request path for WebSocket endpoints, including the leading slash.
    pub path: String,
}

impl BrokerEndpoint {
    /// Parse a broker URL such as `wss://broker.hivemq.com:8884/mqtt`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidEndpoint`] for unknown schemes, a
    /// missing host or an invalid port.
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidEndpoint(url.to_string());

        let (scheme, rest) = url.split_once("://").ok_or_else(invalid)?;
        let scheme = match scheme {
            "mqtt" | "tcp" => Scheme::Tcp,
            "mqtts" | "ssl" => Scheme::Tls,
            "ws" => Scheme::Ws,
            "wss" => Scheme::Wss,
            _ => return Err(invalid()),
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (authority, scheme.default_port()),
        };
        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// The address handed to the MQTT client. WebSocket transports take the
    /// full URL, socket transports only the host.
    fn broker_addr(&self) -> String {
        match self.scheme {
            Scheme::Ws => format!("ws://{}:{}{}", self.host, self.port, self.path),
            Scheme::Wss => format!("wss://{}:{}{}", self.host, self.port, self.path),
            Scheme::Tcp | Scheme::Tls => self.host.clone(),
        }
    }
}

/// MQTT transport configuration.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker URL, fixed for the lifetime of the transport.
    pub url: String,
    /// Client identifier presented to the broker.
    pub client_id: ClientId,
    /// Keep-alive interval.
    pub keep_alive: Duration,
    /// Capacity of the client request queue.
    pub channel_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BROKER_URL.to_string(),
            client_id: ClientId::generate(),
            keep_alive: Duration::from_secs(30),
            channel_capacity: 64,
        }
    }
}

/// MQTT transport.
pub struct MqttTransport {
    config: MqttConfig,
    endpoint: BrokerEndpoint,
}

impl MqttTransport {
    /// Create a new MQTT transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker URL is invalid.
    pub fn new(config: MqttConfig) -> Result<Self, TransportError> {
        let endpoint = BrokerEndpoint::parse(&config.url)?;
        Ok(Self { config, endpoint })
    }

    #[must_use]
    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id.as_str(),
            self.endpoint.broker_addr(),
            self.endpoint.port,
        );
        options
            .set_keep_alive(self.config.keep_alive.max(Duration::from_secs(5)))
            .set_clean_session(true);

        let transport = match self.endpoint.scheme {
            Scheme::Tcp => rumqttc::Transport::Tcp,
            Scheme::Tls => rumqttc::Transport::tls_with_default_config(),
            Scheme::Ws => rumqttc::Transport::Ws,
            Scheme::Wss => rumqttc::Transport::wss_with_default_config(),
        };
        options.set_transport(transport);
        options
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (client, eventloop) =
            AsyncClient::new(self.options(), self.config.channel_capacity.max(8));

        info!(
            url = %self.config.url,
            client_id = %self.config.client_id,
            websocket = self.endpoint.scheme.is_websocket(),
            "Opening MQTT connection"
        );

        Ok(Box::new(MqttConnection {
            id: self.config.client_id.clone(),
            eventloop,
            handle: Arc::new(MqttHandle {
                client,
                closed: AtomicBool::new(false),
            }),
            is_open: true,
        }))
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

/// Inbound half of an MQTT connection; drives the rumqttc event loop.
pub struct MqttConnection {
    id: ClientId,
    eventloop: EventLoop,
    handle: Arc<MqttHandle>,
    is_open: bool,
}

#[async_trait]
impl Connection for MqttConnection {
    fn id(&self) -> &ClientId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<TransportEvent>, TransportError> {
        if !self.is_open {
            return Ok(None);
        }

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    debug!(client_id = %self.id, session_present = ack.session_present, "ConnAck");
                    return Ok(Some(TransportEvent::Connected));
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    trace!(topic = %publish.topic, bytes = publish.payload.len(), "Publish received");
                    return Ok(Some(TransportEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload,
                    }));
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    debug!(client_id = %self.id, "Broker sent disconnect");
                    self.is_open = false;
                    return Ok(Some(TransportEvent::Disconnected));
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!(client_id = %self.id, "Disconnect sent");
                    self.is_open = false;
                    return Ok(None);
                }
                Ok(_) => {
                    // Acks, pings and outgoing bookkeeping
                }
                Err(e) => {
                    self.is_open = false;
                    if self.handle.closed.load(Ordering::SeqCst) {
                        return Ok(None);
                    }
                    warn!(client_id = %self.id, error = %e, "MQTT connection error");
                    return Err(TransportError::Client(e.to_string()));
                }
            }
        }
    }

    fn handle(&self) -> Arc<dyn ClientHandle> {
        self.handle.clone()
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

/// Outbound half of an MQTT connection. `AsyncClient` is a cloneable request
/// queue, so publishing needs no lock.
pub struct MqttHandle {
    client: AsyncClient,
    closed: AtomicBool,
}

#[async_trait]
impl ClientHandle for MqttHandle {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| TransportError::SubscribeFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(()); // Already closed
        }
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }
}
