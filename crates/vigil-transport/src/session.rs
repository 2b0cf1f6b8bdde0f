//! Subscription session.
//!
//! A session owns one broker connection for its whole life:
//!
//! ```text
//! Disconnected ──start()──▶ Connecting ──ConnAck──▶ Connected
//!       ▲                        │                      │
//!       └──── stop() / error ────┴──────────────────────┘
//! ```
//!
//! `Disconnected` is terminal: a session is started at most once, and a
//! restart means a new session. Lifecycle transitions are serialized by one
//! async mutex; inbound messages are dispatched in delivery order by a single
//! task; outbound publishes go straight to the shared client handle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use vigil_core::Router;
use vigil_protocol::Topic;

use crate::dispatcher::CommandDispatcher;
use crate::traits::{ClientHandle, Connection, Transport, TransportError, TransportEvent};

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// `start()` was called on a session that already ran.
    #[error("Session already started")]
    AlreadyStarted,

    /// The transport failed to open a connection.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// State shared between the session, its dispatch task and dispatchers.
pub(crate) struct Shared {
    router: Arc<Router>,
    state: watch::Sender<SessionState>,
    handle: RwLock<Option<Arc<dyn ClientHandle>>>,
}

impl Shared {
    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Session state");
        }
    }

    /// The client handle, only while connected.
    pub(crate) fn connected_handle(&self) -> Option<Arc<dyn ClientHandle>> {
        if self.state() != SessionState::Connected {
            return None;
        }
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install_handle(&self, handle: Arc<dyn ClientHandle>) {
        *self.handle.write().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn take_handle(&self) -> Option<Arc<dyn ClientHandle>> {
        self.handle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    task: Option<JoinHandle<()>>,
}

/// A lifecycle-managed connection to the broker.
pub struct Session {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl Session {
    /// Create a session routing inbound messages into `router`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, router: Arc<Router>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            transport,
            shared: Arc::new(Shared {
                router,
                state,
                handle: RwLock::new(None),
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Open the connection and begin dispatching.
    ///
    /// Subscriptions are issued once the broker accepts the connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyStarted`] on a second call, or the
    /// transport error if the connection cannot be opened. Either way the
    /// session ends up `Disconnected` or keeps its current state.
    pub async fn start(&self) -> Result<(), SessionError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.started {
            return Err(SessionError::AlreadyStarted);
        }
        lifecycle.started = true;

        self.shared.set_state(SessionState::Connecting);
        info!(transport = self.transport.name(), "Connecting to broker");

        let connection = match self.transport.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, "Failed to open broker connection");
                self.shared.set_state(SessionState::Disconnected);
                return Err(e.into());
            }
        };

        let handle = connection.handle();
        self.shared.install_handle(Arc::clone(&handle));
        lifecycle.task = Some(tokio::spawn(dispatch(
            connection,
            handle,
            Arc::clone(&self.shared),
        )));

        Ok(())
    }

    /// Close the connection from any state. Calling it again is a no-op.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;

        if let Some(handle) = self.shared.take_handle() {
            if let Err(e) = handle.close().await {
                debug!(error = %e, "Close reported an error");
            }
        }
        if let Some(task) = lifecycle.task.take() {
            task.abort();
            // Cancelled or already finished; either way the connection is gone.
            let _ = task.await;
            info!("Session stopped");
        }

        self.shared.set_state(SessionState::Disconnected);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the session reaches `Disconnected`.
    pub async fn closed(&self) {
        let mut status = self.status();
        // The sender lives as long as `self`.
        let _ = status
            .wait_for(|state| *state == SessionState::Disconnected)
            .await;
    }

    /// The router this session feeds.
    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.shared.router
    }

    /// A dispatcher publishing through this session's connection.
    #[must_use]
    pub fn dispatcher(&self) -> CommandDispatcher {
        CommandDispatcher::new(Arc::clone(&self.shared))
    }

    /// Send an LED command through this session.
    ///
    /// # Errors
    ///
    /// See [`CommandDispatcher::send_led_command`].
    pub async fn toggle_device(&self, turn_on: bool) -> Result<(), crate::DispatchError> {
        self.dispatcher().send_led_command(turn_on).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.lifecycle.get_mut().task.take() {
            task.abort();
        }
    }
}

/// Drive one connection until it ends.
async fn dispatch(
    mut connection: Box<dyn Connection>,
    handle: Arc<dyn ClientHandle>,
    shared: Arc<Shared>,
) {
    let client_id = connection.id().clone();

    while connection.is_open() {
        match connection.recv().await {
            Ok(Some(TransportEvent::Connected)) => {
                info!(client_id = %client_id, "Connected to broker");
                shared.set_state(SessionState::Connected);
                for topic in Topic::SUBSCRIPTIONS {
                    match handle.subscribe(topic.as_str()).await {
                        Ok(()) => debug!(topic = %topic, "Subscribed"),
                        Err(e) => warn!(topic = %topic, error = %e, "Subscribe failed"),
                    }
                }
            }
            Ok(Some(TransportEvent::Message { topic, payload })) => {
                if shared.state() == SessionState::Connected {
                    shared.router.route(&topic, &payload);
                } else {
                    trace!(topic = %topic, "Dropping message received before connect");
                }
            }
            Ok(Some(TransportEvent::Disconnected)) => {
                warn!(client_id = %client_id, "Broker closed the connection");
                break;
            }
            Ok(None) => {
                debug!(client_id = %client_id, "Connection closed");
                break;
            }
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "Transport disruption");
                break;
            }
        }
    }

    shared.take_handle();
    shared.set_state(SessionState::Disconnected);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{self, LoopbackBroker};
    use std::time::Duration;
    use vigil_core::Signal;

    async fn wait_for(session: &Session, target: SessionState) {
        let mut status = session.status();
        tokio::time::timeout(Duration::from_secs(1), status.wait_for(|s| *s == target))
            .await
            .expect("state reached in time")
            .expect("sender alive");
    }

    async fn connected_session() -> (Session, LoopbackBroker) {
        let (transport, broker) = loopback::pair();
        let session = Session::new(Arc::new(transport), Arc::new(Router::new()));
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Connecting);
        broker.accept();
        wait_for(&session, SessionState::Connected).await;
        (session, broker)
    }

    async fn settle(router: &Router, routed: u64) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while router.stats().routed + router.stats().ignored < routed {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("messages routed in time");
    }

    #[tokio::test]
    async fn test_connect_subscribes_fixed_topics() {
        let (session, broker) = connected_session().await;

        // Subscriptions are issued right after the state flips.
        tokio::time::timeout(Duration::from_secs(1), async {
            while broker.subscriptions().len() < 4 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(
            broker.subscriptions(),
            vec!["gas/value", "dht/temperature", "dht/humidity", "led/status"]
        );
        session.stop().await;
    }

    #[tokio::test]
    async fn test_messages_are_routed_in_order() {
        let (session, broker) = connected_session().await;

        for v in ["10", "20", "30"] {
            broker.deliver("dht/humidity", v);
        }
        broker.deliver("led/status", "on");
        settle(session.router(), 4).await;

        let dashboard = session.router().dashboard();
        assert_eq!(
            dashboard.buffer(Signal::Humidity).values(),
            vec![10.0, 20.0, 30.0]
        );
        assert_eq!(dashboard.led_status(), "on");
        drop(dashboard);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_messages_before_connack_are_dropped() {
        let (transport, broker) = loopback::pair();
        let session = Session::new(Arc::new(transport), Arc::new(Router::new()));
        session.start().await.unwrap();

        broker.deliver("gas/value", "5000");
        broker.accept();
        broker.deliver("gas/value", "100");
        settle(session.router(), 1).await;

        assert_eq!(
            session.router().dashboard().buffer(Signal::Gas).values(),
            vec![100.0]
        );
        session.stop().await;
    }

    #[tokio::test]
    async fn test_threshold_update_without_restart() {
        let (session, broker) = connected_session().await;

        broker.deliver("gas/value", "4500");
        settle(session.router(), 1).await;
        assert_eq!(session.router().dashboard().notifications().len(), 1);

        session.router().set_threshold(Signal::Gas, 5000.0);
        broker.deliver("gas/value", "4500");
        settle(session.router(), 2).await;

        assert_eq!(session.router().dashboard().notifications().len(), 1);
        assert_eq!(broker.connects(), 1);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_broker_disconnect_transitions_to_disconnected() {
        let (session, broker) = connected_session().await;

        broker.disconnect();
        wait_for(&session, SessionState::Disconnected).await;

        assert!(matches!(
            session.toggle_device(true).await,
            Err(crate::DispatchError::NotConnected)
        ));
        // No automatic reconnect.
        assert_eq!(broker.connects(), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (session, broker) = connected_session().await;

        session.stop().await;
        session.stop().await;

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(broker.closes(), 1);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let (transport, _broker) = loopback::pair();
        let session = Session::new(Arc::new(transport), Arc::new(Router::new()));

        session.stop().await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_stop_while_connecting_releases_connection() {
        let (transport, broker) = loopback::pair();
        let session = Session::new(Arc::new(transport), Arc::new(Router::new()));
        session.start().await.unwrap();

        session.stop().await;

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(broker.closes(), 1);
        assert!(!broker.accept());
    }

    #[tokio::test]
    async fn test_session_starts_once() {
        let (session, _broker) = connected_session().await;
        session.stop().await;

        assert!(matches!(
            session.start().await,
            Err(SessionError::AlreadyStarted)
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_connect_is_disconnected() {
        let (transport, broker) = loopback::pair();
        broker.refuse_connections(true);
        let session = Session::new(Arc::new(transport), Arc::new(Router::new()));

        assert!(matches!(
            session.start().await,
            Err(SessionError::Transport(_))
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_dispatch_ends_once_connection_is_closed() {
        let (transport, broker) = loopback::pair();
        let connection = transport.connect().await.unwrap();
        let handle = connection.handle();
        let (state, _) = watch::channel(SessionState::Connected);
        let shared = Arc::new(Shared {
            router: Arc::new(Router::new()),
            state,
            handle: RwLock::new(Some(Arc::clone(&handle))),
        });

        broker.deliver("gas/value", "4500");
        handle.close().await.unwrap();

        tokio::time::timeout(
            Duration::from_secs(1),
            dispatch(connection, handle, Arc::clone(&shared)),
        )
        .await
        .expect("dispatch ends");

        assert_eq!(shared.state(), SessionState::Disconnected);
        assert!(shared.connected_handle().is_none());
        assert_eq!(shared.router.stats().routed, 0);
    }

    #[tokio::test]
    async fn test_closed_resolves_after_stop() {
        let (session, _broker) = connected_session().await;
        session.stop().await;
        tokio::time::timeout(Duration::from_secs(1), session.closed())
            .await
            .unwrap();
    }
}
