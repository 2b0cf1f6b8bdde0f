//! Topic router for Vigil.
//!
//! The router turns an inbound `(topic, payload)` pair into a state change on
//! the dashboard: sensor readings go to their signal buffer and through the
//! threshold evaluator, status text replaces the LED status, and every
//! recognised message advances the shared timeline. Each message is applied
//! under a single write lock, so readers never observe a half-applied update.

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, trace};
use vigil_protocol::{codec, Payload, Signal, Topic};

use crate::buffer::{Sample, DEFAULT_WINDOW};
use crate::dashboard::{Dashboard, Snapshot};
use crate::notification::Notification;
use crate::threshold::{self, Thresholds};

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Rolling window size for signal buffers and the timeline.
    pub window: usize,
    /// Bound on the notification log; `None` keeps every alert.
    pub max_notifications: Option<usize>,
    /// Capacity of the routed-event broadcast channel.
    pub event_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_notifications: None,
            event_capacity: 1024,
        }
    }
}

/// The outcome of routing one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutedEvent {
    /// A sensor reading was recorded.
    Reading {
        signal: Signal,
        sample: Sample,
        /// Raised when the reading exceeded its threshold.
        notification: Option<Notification>,
    },
    /// The LED status changed.
    Status { status: String },
    /// The topic is not part of the inbound feed.
    Ignored { topic: String },
}

impl RoutedEvent {
    #[must_use]
    pub fn notification(&self) -> Option<&Notification> {
        match self {
            RoutedEvent::Reading { notification, .. } => notification.as_ref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_ignored(&self) -> bool {
        matches!(self, RoutedEvent::Ignored { .. })
    }
}

/// Router statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Messages that changed state.
    pub routed: u64,
    /// Messages on topics outside the inbound feed.
    pub ignored: u64,
    /// Sensor payloads that did not parse as a number.
    pub malformed: u64,
    /// Notifications raised.
    pub notifications: u64,
}

#[derive(Debug, Default)]
struct Counters {
    routed: AtomicU64,
    ignored: AtomicU64,
    malformed: AtomicU64,
    notifications: AtomicU64,
}

/// Routes inbound messages into dashboard state.
pub struct Router {
    dashboard: RwLock<Dashboard>,
    thresholds: Arc<Thresholds>,
    events: broadcast::Sender<Arc<RoutedEvent>>,
    counters: Counters,
    config: RouterConfig,
}

impl Router {
    /// Create a router with default configuration and default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default(), Arc::new(Thresholds::new()))
    }

    /// Create a router reading thresholds from a shared configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig, thresholds: Arc<Thresholds>) -> Self {
        info!("Creating router with config: {:?}", config);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            dashboard: RwLock::new(Dashboard::with_limits(
                config.window,
                config.max_notifications,
            )),
            thresholds,
            events,
            counters: Counters::default(),
            config,
        }
    }

    /// Route one inbound message.
    ///
    /// Unknown and outbound topics are dropped without touching state, but
    /// are still broadcast as [`RoutedEvent::Ignored`].
    /// Malformed sensor payloads are recorded as NaN and never raise alerts.
    pub fn route(&self, topic: &str, payload: &[u8]) -> RoutedEvent {
        let Some(topic) = Topic::parse(topic) else {
            return self.ignore(topic);
        };
        let Some(payload) = codec::decode(topic, payload) else {
            return self.ignore(topic.as_str());
        };

        let now = Utc::now();
        let event = {
            let mut dashboard = self.write();
            let event = match (topic.signal(), payload) {
                (Some(signal), Payload::Reading(value)) => {
                    self.record_reading(&mut dashboard, signal, value, now)
                }
                (_, Payload::Status(status)) => {
                    debug!(status = %status, "LED status");
                    dashboard.set_led_status(status.clone());
                    RoutedEvent::Status { status }
                }
                (None, Payload::Reading(_)) => return self.ignore(topic.as_str()),
            };
            dashboard.tick(now);
            event
        };

        self.counters.routed.fetch_add(1, Ordering::Relaxed);
        // No receivers is fine.
        let _ = self.events.send(Arc::new(event.clone()));
        event
    }

    fn record_reading(
        &self,
        dashboard: &mut Dashboard,
        signal: Signal,
        value: f64,
        now: chrono::DateTime<Utc>,
    ) -> RoutedEvent {
        if value.is_nan() {
            self.counters.malformed.fetch_add(1, Ordering::Relaxed);
            debug!(signal = %signal, "Malformed reading, recorded as NaN");
        }

        let sample = Sample::new(value, now);
        dashboard.buffer_mut(signal).push(sample);
        trace!(signal = %signal, value, "Reading recorded");

        let notification = threshold::evaluate(signal, value, self.thresholds.get(signal));
        if let Some(alert) = &notification {
            self.counters.notifications.fetch_add(1, Ordering::Relaxed);
            info!(signal = %signal, value, threshold = alert.threshold, "{}", alert.message);
            dashboard.notify(alert.clone());
        }

        RoutedEvent::Reading {
            signal,
            sample,
            notification,
        }
    }

    fn ignore(&self, topic: &str) -> RoutedEvent {
        self.counters.ignored.fetch_add(1, Ordering::Relaxed);
        trace!(topic = %topic, "Ignoring message");
        let event = RoutedEvent::Ignored {
            topic: topic.to_string(),
        };
        let _ = self.events.send(Arc::new(event.clone()));
        event
    }

    /// Shared threshold configuration.
    #[must_use]
    pub fn thresholds(&self) -> &Arc<Thresholds> {
        &self.thresholds
    }

    /// Update a threshold. Takes effect from the next reading on.
    pub fn set_threshold(&self, signal: Signal, value: f64) -> f64 {
        self.thresholds.set(signal, value)
    }

    /// Subscribe to every event that changes state.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RoutedEvent>> {
        self.events.subscribe()
    }

    /// Point-in-time view of the dashboard.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.read().snapshot(&self.thresholds)
    }

    /// Read access to the dashboard.
    pub fn dashboard(&self) -> RwLockReadGuard<'_, Dashboard> {
        self.read()
    }

    /// Clear all history, as on a session restart.
    pub fn reset(&self) {
        self.write().clear();
        debug!("Dashboard cleared");
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            routed: self.counters.routed.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            notifications: self.counters.notifications.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, Dashboard> {
        self.dashboard.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Dashboard> {
        self.dashboard.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
