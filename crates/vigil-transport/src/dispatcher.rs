//! Outbound LED commands.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use vigil_protocol::{encode_command, LedCommand, Topic};

use crate::session::{SessionState, Shared};
use crate::traits::TransportError;

/// Dispatch errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The session has no live, accepted connection.
    #[error("Not connected to the broker")]
    NotConnected,

    /// The transport rejected the publish.
    #[error("Publish failed: {0}")]
    Publish(#[from] TransportError),
}

/// Publishes actuation commands through a session's connection.
///
/// Commands are sent immediately or rejected; nothing is queued for later.
#[derive(Clone)]
pub struct CommandDispatcher {
    shared: Arc<Shared>,
}

impl CommandDispatcher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Turn the LED on (`L`) or off (`D`).
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotConnected`] unless the session is
    /// connected, without attempting a publish.
    pub async fn send_led_command(&self, turn_on: bool) -> Result<(), DispatchError> {
        self.send(LedCommand::from(turn_on)).await
    }

    /// Publish a command to the control topic.
    ///
    /// # Errors
    ///
    /// See [`CommandDispatcher::send_led_command`].
    pub async fn send(&self, command: LedCommand) -> Result<(), DispatchError> {
        let Some(handle) = self.shared.connected_handle() else {
            warn!(command = command.opcode(), "LED command rejected: not connected");
            return Err(DispatchError::NotConnected);
        };

        handle
            .publish(Topic::LedControl.as_str(), encode_command(command))
            .await?;
        info!(command = command.opcode(), topic = %Topic::LedControl, "LED command sent");
        Ok(())
    }

    /// Whether a command sent now would be attempted.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.state() == SessionState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback;
    use crate::session::Session;
    use std::time::Duration;
    use vigil_core::Router;

    #[tokio::test]
    async fn test_toggle_while_disconnected_is_rejected() {
        let (transport, broker) = loopback::pair();
        let session = Session::new(Arc::new(transport), Arc::new(Router::new()));

        let result = session.dispatcher().send_led_command(true).await;

        assert!(matches!(result, Err(DispatchError::NotConnected)));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_while_connecting_is_rejected() {
        let (transport, broker) = loopback::pair();
        let session = Session::new(Arc::new(transport), Arc::new(Router::new()));
        session.start().await.unwrap();

        let dispatcher = session.dispatcher();
        assert!(!dispatcher.is_connected());
        assert!(matches!(
            dispatcher.send_led_command(false).await,
            Err(DispatchError::NotConnected)
        ));
        assert!(broker.published().is_empty());
        session.stop().await;
    }

    #[tokio::test]
    async fn test_toggle_publishes_opcodes() {
        let (transport, broker) = loopback::pair();
        let session = Session::new(Arc::new(transport), Arc::new(Router::new()));
        session.start().await.unwrap();
        broker.accept();

        let mut status = session.status();
        tokio::time::timeout(
            Duration::from_secs(1),
            status.wait_for(|s| *s == SessionState::Connected),
        )
        .await
        .unwrap()
        .unwrap();

        let dispatcher = session.dispatcher();
        dispatcher.send_led_command(true).await.unwrap();
        dispatcher.send_led_command(false).await.unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, "led/control");
        assert_eq!(&published[0].1[..], b"L");
        assert_eq!(&published[1].1[..], b"D");
        session.stop().await;
    }

    #[tokio::test]
    async fn test_dispatcher_after_stop_is_rejected() {
        let (transport, broker) = loopback::pair();
        let session = Session::new(Arc::new(transport), Arc::new(Router::new()));
        session.start().await.unwrap();
        broker.accept();
        let dispatcher = session.dispatcher();

        session.stop().await;

        assert!(matches!(
            dispatcher.send_led_command(true).await,
            Err(DispatchError::NotConnected)
        ));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_commands() {
        let (transport, broker) = loopback::pair();
        let session = Session::new(Arc::new(transport), Arc::new(Router::new()));
        session.start().await.unwrap();
        broker.accept();
        let mut status = session.status();
        status
            .wait_for(|s| *s == SessionState::Connected)
            .await
            .unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let dispatcher = session.dispatcher();
                tokio::spawn(async move { dispatcher.send_led_command(i % 2 == 0).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(broker.published().len(), 8);
        session.stop().await;
    }
}
