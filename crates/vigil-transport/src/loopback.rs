//! In-memory loopback transport.
//!
//! The loopback transport stands in for a broker: a [`LoopbackBroker`] feeds
//! events into the current connection and records every subscribe and
//! publish the client makes. Used in tests and offline demos.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

use crate::traits::{ClientHandle, ClientId, Connection, Transport, TransportError, TransportEvent};

#[derive(Default)]
struct BrokerState {
    /// Sender feeding the most recent connection.
    inbox: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    subscriptions: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, Bytes)>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    refuse_connect: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a connected transport/broker pair.
#[must_use]
pub fn pair() -> (LoopbackTransport, LoopbackBroker) {
    let state = Arc::new(BrokerState::default());
    (
        LoopbackTransport {
            state: Arc::clone(&state),
        },
        LoopbackBroker { state },
    )
}

/// Client side of the loopback.
pub struct LoopbackTransport {
    state: Arc<BrokerState>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        if self.state.refuse_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Other("loopback broker refused connection".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.state.inbox) = Some(tx);
        let n = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(connection = n, "Loopback connection opened");

        Ok(Box::new(LoopbackConnection {
            id: ClientId::new(format!("loopback-{n}")),
            rx,
            handle: Arc::new(LoopbackHandle {
                state: Arc::clone(&self.state),
                closed: AtomicBool::new(false),
            }),
        }))
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

struct LoopbackConnection {
    id: ClientId,
    rx: mpsc::UnboundedReceiver<TransportEvent>,
    handle: Arc<LoopbackHandle>,
}

#[async_trait]
impl Connection for LoopbackConnection {
    fn id(&self) -> &ClientId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<TransportEvent>, TransportError> {
        if self.handle.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.rx.recv().await)
    }

    fn handle(&self) -> Arc<dyn ClientHandle> {
        self.handle.clone()
    }

    fn is_open(&self) -> bool {
        !self.handle.closed.load(Ordering::SeqCst)
    }
}

struct LoopbackHandle {
    state: Arc<BrokerState>,
    closed: AtomicBool,
}

#[async_trait]
impl ClientHandle for LoopbackHandle {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        lock(&self.state.subscriptions).push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        lock(&self.state.published).push((topic.to_string(), payload));
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        // Dropping the sender ends the connection's event stream.
        lock(&self.state.inbox).take();
        Ok(())
    }
}

/// Broker side of the loopback.
#[derive(Clone)]
pub struct LoopbackBroker {
    state: Arc<BrokerState>,
}

impl LoopbackBroker {
    fn send(&self, event: TransportEvent) -> bool {
        lock(&self.state.inbox)
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Accept the current connection. Returns `false` if none is open.
    pub fn accept(&self) -> bool {
        self.send(TransportEvent::Connected)
    }

    /// Deliver a message to the current connection.
    pub fn deliver(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        self.send(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.into(),
        })
    }

    /// Report a broker-side disconnect to the current connection.
    pub fn disconnect(&self) -> bool {
        self.send(TransportEvent::Disconnected)
    }

    /// Make subsequent connection attempts fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Topics subscribed so far, in request order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.state.subscriptions).clone()
    }

    /// Messages published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Bytes)> {
        lock(&self.state.published).clone()
    }

    /// Number of connections opened.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Number of connections closed by the client.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_delivers_in_order() {
        let (transport, broker) = pair();
        let mut conn = transport.connect().await.unwrap();

        assert!(broker.accept());
        assert!(broker.deliver("gas/value", "1"));
        assert!(broker.deliver("gas/value", "2"));

        assert_eq!(conn.recv().await.unwrap(), Some(TransportEvent::Connected));
        for expected in ["1", "2"] {
            match conn.recv().await.unwrap() {
                Some(TransportEvent::Message { payload, .. }) => {
                    assert_eq!(&payload[..], expected.as_bytes())
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_loopback_records_outbound() {
        let (transport, broker) = pair();
        let conn = transport.connect().await.unwrap();
        let handle = conn.handle();

        handle.subscribe("led/status").await.unwrap();
        handle
            .publish("led/control", Bytes::from_static(b"L"))
            .await
            .unwrap();

        assert_eq!(broker.subscriptions(), vec!["led/status".to_string()]);
        assert_eq!(broker.published()[0].0, "led/control");
    }

    #[tokio::test]
    async fn test_loopback_close_is_idempotent() {
        let (transport, broker) = pair();
        let mut conn = transport.connect().await.unwrap();
        let handle = conn.handle();

        handle.close().await.unwrap();
        handle.close().await.unwrap();

        assert_eq!(broker.closes(), 1);
        assert!(!conn.is_open());
        assert_eq!(conn.recv().await.unwrap(), None);
        assert!(handle.publish("led/control", Bytes::new()).await.is_err());
        assert!(!broker.deliver("gas/value", "1"));
    }

    #[tokio::test]
    async fn test_loopback_refuses() {
        let (transport, broker) = pair();
        broker.refuse_connections(true);
        assert!(transport.connect().await.is_err());
        assert_eq!(broker.connects(), 0);
    }
}
