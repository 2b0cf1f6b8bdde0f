//! Metrics collection and export for Vigil.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use vigil_core::{RoutedEvent, Router};
use vigil_protocol::Topic;
use vigil_transport::SessionState;

/// Metric names.
pub mod names {
    pub const MESSAGES_TOTAL: &str = "vigil_messages_total";
    pub const MESSAGES_IGNORED: &str = "vigil_messages_ignored_total";
    pub const MALFORMED_TOTAL: &str = "vigil_malformed_payloads_total";
    pub const NOTIFICATIONS_TOTAL: &str = "vigil_notifications_total";
    pub const LED_COMMANDS_TOTAL: &str = "vigil_led_commands_total";
    pub const SESSION_STATE: &str = "vigil_session_state";
    pub const RECONNECTS_TOTAL: &str = "vigil_reconnects_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::MESSAGES_TOTAL,
        "Messages routed, labelled by topic"
    );
    metrics::describe_counter!(
        names::MESSAGES_IGNORED,
        "Messages dropped for an unknown or outbound topic"
    );
    metrics::describe_counter!(
        names::MALFORMED_TOTAL,
        "Sensor payloads that did not parse as a number"
    );
    metrics::describe_counter!(
        names::NOTIFICATIONS_TOTAL,
        "Threshold notifications raised, labelled by signal"
    );
    metrics::describe_counter!(
        names::LED_COMMANDS_TOTAL,
        "LED commands, labelled by command and outcome"
    );
    metrics::describe_gauge!(
        names::SESSION_STATE,
        "Broker session state (0 disconnected, 1 connecting, 2 connected)"
    );
    metrics::describe_counter!(names::RECONNECTS_TOTAL, "Broker reconnect attempts");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record one routed event.
pub fn record_event(event: &RoutedEvent) {
    match event {
        RoutedEvent::Reading {
            signal,
            sample,
            notification,
        } => {
            counter!(names::MESSAGES_TOTAL, "topic" => signal.topic().as_str()).increment(1);
            if sample.value.is_nan() {
                counter!(names::MALFORMED_TOTAL, "signal" => signal.name()).increment(1);
            }
            if notification.is_some() {
                counter!(names::NOTIFICATIONS_TOTAL, "signal" => signal.name()).increment(1);
            }
        }
        RoutedEvent::Status { .. } => {
            counter!(names::MESSAGES_TOTAL, "topic" => Topic::LedStatus.as_str()).increment(1);
        }
        RoutedEvent::Ignored { .. } => {
            counter!(names::MESSAGES_IGNORED).increment(1);
        }
    }
}

/// Record an LED command and whether it went out.
pub fn record_led_command(on: bool, outcome: &'static str) {
    let command = if on { "on" } else { "off" };
    counter!(names::LED_COMMANDS_TOTAL, "command" => command, "outcome" => outcome).increment(1);
}

/// Update the session state gauge.
pub fn set_session_state(state: SessionState) {
    let value = match state {
        SessionState::Disconnected => 0.0,
        SessionState::Connecting => 1.0,
        SessionState::Connected => 2.0,
    };
    gauge!(names::SESSION_STATE).set(value);
}

/// Record a reconnect attempt.
pub fn record_reconnect() {
    counter!(names::RECONNECTS_TOTAL).increment(1);
}

/// Follow the router's event feed and record every event until the router
/// is dropped.
pub fn spawn_event_recorder(router: &Arc<Router>) -> JoinHandle<()> {
    follow_events(router.subscribe(), record_event)
}

fn follow_events<F>(
    mut events: broadcast::Receiver<Arc<RoutedEvent>>,
    mut on_event: F,
) -> JoinHandle<()>
where
    F: FnMut(&RoutedEvent) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => on_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Metrics recorder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::Signal;

    #[test]
    fn test_record_without_recorder() {
        // No recorder installed; recording is a no-op and must not panic.
        let router = Router::new();
        record_event(&router.route("gas/value", b"5000"));
        record_event(&router.route("gas/value", b"abc"));
        record_event(&router.route("led/status", b"on"));
        record_event(&router.route("unknown", b"1"));
        record_led_command(true, "sent");
        set_session_state(SessionState::Connected);
        record_reconnect();
    }

    #[tokio::test]
    async fn test_recorder_sees_every_routed_event() {
        let router = Arc::new(Router::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let task = follow_events(router.subscribe(), move |event| {
            let _ = tx.send(event.clone());
        });

        router.route("sensor/pressure", b"1013");
        router.route("gas/value", b"4500");
        drop(router);
        task.await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!(first.is_ignored());
        let second = rx.recv().await.unwrap();
        assert!(second.notification().is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_event_recorder_follows_router() {
        let router = Arc::new(Router::new());
        let recorder = spawn_event_recorder(&router);

        router.route("dht/temperature", b"31");
        assert_eq!(router.dashboard().buffer(Signal::Temperature).len(), 1);

        recorder.abort();
        assert!(recorder.await.unwrap_err().is_cancelled());
    }
}
