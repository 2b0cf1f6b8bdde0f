//! Reconnecting session supervisor.
//!
//! A [`Session`] is started at most once, so recovering from a broker
//! disconnect means building a new one. The supervisor does that in a loop
//! over the same [`Router`], waiting a fixed delay between attempts.

use crate::config::SupervisorConfig;
use crate::metrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use vigil_core::Router;
use vigil_transport::{DispatchError, Session, SessionState, Transport};

/// Keeps a broker session alive.
pub struct Supervisor {
    transport: Arc<dyn Transport>,
    router: Arc<Router>,
    config: SupervisorConfig,
    current: RwLock<Option<Arc<Session>>>,
    state: watch::Sender<SessionState>,
    shutdown: watch::Sender<bool>,
    reconnects: AtomicU64,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        router: Arc<Router>,
        config: SupervisorConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            transport,
            router,
            config,
            current: RwLock::new(None),
            state,
            shutdown,
            reconnects: AtomicU64::new(0),
        }
    }

    /// The router every session feeds.
    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// State of the current session.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state changes across sessions.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Number of sessions started after the first.
    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish_state(&self, state: SessionState) {
        self.state.send_replace(state);
        metrics::set_session_state(state);
    }

    /// Send an LED command through the current session.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotConnected`] between sessions, otherwise
    /// whatever the session's dispatcher returns.
    pub async fn toggle_device(&self, turn_on: bool) -> Result<(), DispatchError> {
        let Some(session) = self.current() else {
            return Err(DispatchError::NotConnected);
        };
        session.toggle_device(turn_on).await
    }

    /// Ask [`Supervisor::run`] to stop the current session and return.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run sessions until shutdown, or until one ends with reconnect disabled.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let delay = Duration::from_millis(self.config.reconnect_delay_ms);
        let mut first = true;

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            if !first {
                self.reconnects.fetch_add(1, Ordering::Relaxed);
                metrics::record_reconnect();
                if self.config.reset_on_reconnect {
                    self.router.reset();
                }
                info!(attempt = self.reconnects(), "Reconnecting to broker");
            }
            first = false;

            let session = Arc::new(Session::new(
                Arc::clone(&self.transport),
                Arc::clone(&self.router),
            ));
            *self.current.write().unwrap_or_else(PoisonError::into_inner) =
                Some(Arc::clone(&session));

            let stopped = self.follow(&session, &mut shutdown).await;
            if stopped {
                break;
            }

            if !self.config.reconnect {
                info!("Session ended; reconnect disabled");
                break;
            }

            debug!(delay_ms = self.config.reconnect_delay_ms, "Waiting before reconnect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        if let Some(session) = self.current() {
            session.stop().await;
        }
        self.publish_state(SessionState::Disconnected);
        info!("Supervisor stopped");
    }

    /// Start `session` and mirror its state until it disconnects. Returns
    /// `true` if shutdown was requested meanwhile.
    async fn follow(&self, session: &Session, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut status = session.status();

        if let Err(e) = session.start().await {
            warn!(error = %e, "Session failed to start");
            self.publish_state(SessionState::Disconnected);
            return false;
        }

        loop {
            let state = *status.borrow_and_update();
            self.publish_state(state);
            if state == SessionState::Disconnected {
                return false;
            }

            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                _ = shutdown.changed() => {
                    session.stop().await;
                    return true;
                }
            }
        }
    }
}
