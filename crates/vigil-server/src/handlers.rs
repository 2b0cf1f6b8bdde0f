//! HTTP and WebSocket handlers for the Vigil server.
//!
//! The presentation layer reads the dashboard through `/api/snapshot`,
//! follows the live feed on `/ws` and drives the monitor through the
//! threshold and LED endpoints.

use crate::config::Config;
use crate::metrics;
use crate::supervisor::Supervisor;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use vigil_core::{Signal, Snapshot};
use vigil_protocol::LedCommand;
use vigil_transport::{DispatchError, SessionState};

/// Shared server state.
pub struct AppState {
    /// Keeps the broker session alive and owns the router.
    pub supervisor: Arc<Supervisor>,
}

/// Errors returned by the API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The path names no known signal.
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    /// The request body was understood but rejected.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The LED command could not be sent.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::UnknownSignal(_) => (StatusCode::NOT_FOUND, "UNKNOWN_SIGNAL"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Dispatch(DispatchError::NotConnected) => {
                (StatusCode::CONFLICT, "NOT_CONNECTED")
            }
            ApiError::Dispatch(DispatchError::Publish(e)) => {
                warn!(error = %e, "LED publish failed");
                (StatusCode::BAD_GATEWAY, "PUBLISH_FAILED")
            }
        };

        let body = json!({
            "error": self.to_string(),
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

/// Snapshot plus the broker connection state.
#[derive(Debug, Serialize)]
pub struct DashboardView {
    #[serde(flatten)]
    pub snapshot: Snapshot,
    pub connection: SessionState,
}

/// Body of `PUT /api/thresholds/{signal}`.
#[derive(Debug, Deserialize)]
pub struct ThresholdUpdate {
    pub value: f64,
}

/// Body of `POST /api/led`.
#[derive(Debug, Deserialize)]
pub struct LedRequest {
    pub on: bool,
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .route("/api/thresholds/:signal", put(threshold_handler))
        .route("/api/led", post(led_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Serve the HTTP/WebSocket surface until the listener fails.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run_server(config: &Config, state: Arc<AppState>) -> Result<()> {
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Vigil listening on http://{}", addr);
    info!("Live feed: ws://{}/ws", addr);

    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Current dashboard state.
async fn snapshot_handler(State(state): State<Arc<AppState>>) -> Json<DashboardView> {
    Json(DashboardView {
        snapshot: state.supervisor.router().snapshot(),
        connection: state.supervisor.state(),
    })
}

/// Replace one signal's threshold; applies to the next reading.
async fn threshold_handler(
    State(state): State<Arc<AppState>>,
    Path(signal): Path<String>,
    Json(update): Json<ThresholdUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signal: Signal = signal
        .parse()
        .map_err(|_| ApiError::UnknownSignal(signal))?;
    if !update.value.is_finite() {
        return Err(ApiError::BadRequest(
            "threshold must be a finite number".to_string(),
        ));
    }

    let previous = state.supervisor.router().set_threshold(signal, update.value);
    info!(signal = %signal, previous, value = update.value, "Threshold updated");

    Ok(Json(json!({
        "signal": signal,
        "value": update.value,
        "previous": previous,
    })))
}

/// Publish an LED command.
async fn led_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LedRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.supervisor.toggle_device(request.on).await {
        Ok(()) => {
            metrics::record_led_command(request.on, "sent");
            Ok(Json(json!({
                "command": LedCommand::from(request.on).opcode(),
            })))
        }
        Err(e) => {
            metrics::record_led_command(request.on, "rejected");
            Err(e.into())
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Stream routed events and session state changes to one client. Ignored
/// topics are not forwarded.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.supervisor.router().subscribe();
    let mut status = state.supervisor.status();

    debug!("Live feed client connected");

    // Current state first, then changes.
    let initial = session_message(*status.borrow_and_update());
    if sender.send(Message::Text(initial)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let text = match event {
                    Ok(event) if event.is_ignored() => continue,
                    Ok(event) => match serde_json::to_string(event.as_ref()) {
                        Ok(text) => text,
                        Err(e) => {
                            error!(error = %e, "Failed to encode event");
                            continue;
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Live feed client lagging");
                        json!({"kind": "lagged", "skipped": skipped}).to_string()
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }

            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let text = session_message(*status.borrow_and_update());
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // The feed is one-way
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                }
            }
        }
    }

    debug!("Live feed client disconnected");
}

fn session_message(state: SessionState) -> String {
    json!({"kind": "session", "state": state}).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;
    use axum::body::to_bytes;
    use std::time::Duration;
    use vigil_core::Router as EventRouter;
    use vigil_transport::loopback::{self, LoopbackBroker};

    fn state() -> (Arc<AppState>, LoopbackBroker) {
        let (transport, broker) = loopback::pair();
        let supervisor = Supervisor::new(
            Arc::new(transport),
            Arc::new(EventRouter::new()),
            SupervisorConfig::default(),
        );
        (
            Arc::new(AppState {
                supervisor: Arc::new(supervisor),
            }),
            broker,
        )
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_before_any_reading() {
        let (state, _broker) = state();

        let Json(view) = snapshot_handler(State(state)).await;
        let value = serde_json::to_value(&view).unwrap();

        assert_eq!(value["connection"], "disconnected");
        assert_eq!(value["led_status"], "unknown");
        assert_eq!(value["signals"][0]["current"], "unknown");
        assert_eq!(value["notifications"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_threshold_update_applies_to_next_reading() {
        let (state, _broker) = state();

        let Json(body) = threshold_handler(
            State(Arc::clone(&state)),
            Path("temperature".to_string()),
            Json(ThresholdUpdate { value: 35.0 }),
        )
        .await
        .unwrap();
        assert_eq!(body["previous"], 30.0);
        assert_eq!(body["value"], 35.0);

        let router = state.supervisor.router();
        assert!(router.route("dht/temperature", b"32").notification().is_none());
        assert!(router.route("dht/temperature", b"36").notification().is_some());
    }

    #[tokio::test]
    async fn test_threshold_unknown_signal_is_not_found() {
        let (state, _broker) = state();

        let err = threshold_handler(
            State(state),
            Path("pressure".to_string()),
            Json(ThresholdUpdate { value: 1.0 }),
        )
        .await
        .unwrap_err();

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "UNKNOWN_SIGNAL");
    }

    #[tokio::test]
    async fn test_threshold_non_finite_is_bad_request() {
        let (state, _broker) = state();

        let err = threshold_handler(
            State(Arc::clone(&state)),
            Path("gas".to_string()),
            Json(ThresholdUpdate { value: f64::INFINITY }),
        )
        .await
        .unwrap_err();

        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.supervisor.router().thresholds().get(Signal::Gas), 4000.0);
    }

    #[tokio::test]
    async fn test_led_while_disconnected_is_conflict() {
        let (state, broker) = state();

        let err = led_handler(State(state), Json(LedRequest { on: true }))
            .await
            .unwrap_err();

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["code"], "NOT_CONNECTED");
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_led_while_connected_publishes() {
        let (state, broker) = state();
        let supervisor = Arc::clone(&state.supervisor);
        let task = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.run().await }
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            while broker.connects() < 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        broker.accept();
        let mut status = supervisor.status();
        tokio::time::timeout(
            Duration::from_secs(1),
            status.wait_for(|s| *s == SessionState::Connected),
        )
        .await
        .unwrap()
        .unwrap();

        let Json(body) = led_handler(State(Arc::clone(&state)), Json(LedRequest { on: false }))
            .await
            .unwrap();
        assert_eq!(body["command"], "D");
        assert_eq!(broker.published()[0].0, "led/control");

        let Json(view) = snapshot_handler(State(state)).await;
        assert_eq!(view.connection, SessionState::Connected);

        supervisor.shutdown();
        task.await.unwrap();
    }

    async fn serve(state: Arc<AppState>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app(state)).await.unwrap();
        });
        addr
    }

    async fn next_frame<S>(ws: &mut S) -> serde_json::Value
    where
        S: futures_util::Stream<
                Item = Result<
                    tokio_tungstenite::tungstenite::Message,
                    tokio_tungstenite::tungstenite::Error,
                >,
            > + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(1), ws.next())
                .await
                .expect("frame in time")
                .expect("stream open")
                .expect("valid frame");
            if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_live_feed_streams_state_and_events() {
        let (state, broker) = state();
        let addr = serve(Arc::clone(&state)).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();

        let initial = next_frame(&mut ws).await;
        assert_eq!(initial["kind"], "session");
        assert_eq!(initial["state"], "disconnected");

        // The handler subscribed before sending the initial frame.
        let router = Arc::clone(state.supervisor.router());
        router.route("gas/value", b"4500");
        let reading = next_frame(&mut ws).await;
        assert_eq!(reading["kind"], "reading");
        assert_eq!(reading["signal"], "gas");
        assert_eq!(reading["sample"]["value"], 4500.0);
        assert!(reading["notification"]["message"]
            .as_str()
            .unwrap()
            .contains("4000"));

        router.route("sensor/pressure", b"1013");
        router.route("led/status", b"on");
        let status = next_frame(&mut ws).await;
        assert_eq!(status["kind"], "status");
        assert_eq!(status["status"], "on");

        let supervisor = Arc::clone(&state.supervisor);
        let task = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.run().await }
        });
        tokio::time::timeout(Duration::from_secs(1), async {
            while broker.connects() < 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        broker.accept();

        loop {
            let frame = next_frame(&mut ws).await;
            assert_eq!(frame["kind"], "session");
            if frame["state"] == "connected" {
                break;
            }
        }

        supervisor.shutdown();
        task.await.unwrap();
    }

    #[test]
    fn test_publish_failure_is_bad_gateway() {
        let err = ApiError::from(DispatchError::Publish(
            vigil_transport::TransportError::PublishFailed("queue full".to_string()),
        ));
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_session_message() {
        let value: serde_json::Value =
            serde_json::from_str(&session_message(SessionState::Connecting)).unwrap();
        assert_eq!(value["kind"], "session");
        assert_eq!(value["state"], "connecting");
    }
}
