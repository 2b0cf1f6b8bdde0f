//! Observable monitor state.
//!
//! The dashboard holds everything the presentation layer renders: one rolling
//! buffer per signal, the LED status, the shared timeline and the
//! notification log. [`Snapshot`] is its serializable, point-in-time view.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use vigil_protocol::{format_reading, Signal};

use crate::buffer::{Sample, SignalBuffer, Window, DEFAULT_WINDOW};
use crate::notification::{Notification, NotificationLog};
use crate::threshold::Thresholds;

/// Displayed in place of a value or status that has not been received yet.
pub const UNKNOWN: &str = "unknown";

/// Mutable monitor state for one session.
#[derive(Debug, Clone)]
pub struct Dashboard {
    gas: SignalBuffer,
    temperature: SignalBuffer,
    humidity: SignalBuffer,
    led_status: Option<String>,
    /// One entry per routed message, regardless of which signal it carried.
    /// Signal buffers only grow on their own topic, so this timeline does
    /// not line up index-for-index with any single buffer.
    timeline: Window<DateTime<Utc>>,
    notifications: NotificationLog,
}

impl Dashboard {
    /// Dashboard with the default window and an unbounded notification log.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_WINDOW, None)
    }

    #[must_use]
    pub fn with_limits(window: usize, max_notifications: Option<usize>) -> Self {
        Self {
            gas: SignalBuffer::with_capacity(window),
            temperature: SignalBuffer::with_capacity(window),
            humidity: SignalBuffer::with_capacity(window),
            led_status: None,
            timeline: Window::with_capacity(window),
            notifications: NotificationLog::with_limit(max_notifications),
        }
    }

    #[must_use]
    pub fn buffer(&self, signal: Signal) -> &SignalBuffer {
        match signal {
            Signal::Gas => &self.gas,
            Signal::Temperature => &self.temperature,
            Signal::Humidity => &self.humidity,
        }
    }

    pub fn buffer_mut(&mut self, signal: Signal) -> &mut SignalBuffer {
        match signal {
            Signal::Gas => &mut self.gas,
            Signal::Temperature => &mut self.temperature,
            Signal::Humidity => &mut self.humidity,
        }
    }

    /// Current display value of a signal: the last reading, or
    /// [`UNKNOWN`] before the first one.
    #[must_use]
    pub fn current_display(&self, signal: Signal) -> String {
        self.buffer(signal)
            .current()
            .map(format_reading)
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    /// The LED status label, or [`UNKNOWN`] before the first status message.
    #[must_use]
    pub fn led_status(&self) -> &str {
        self.led_status.as_deref().unwrap_or(UNKNOWN)
    }

    pub fn set_led_status(&mut self, status: impl Into<String>) {
        self.led_status = Some(status.into());
    }

    /// Append one entry to the shared timeline.
    pub fn tick(&mut self, at: DateTime<Utc>) {
        self.timeline.push(at);
    }

    #[must_use]
    pub fn timeline(&self) -> Vec<DateTime<Utc>> {
        self.timeline.iter().copied().collect()
    }

    #[must_use]
    pub fn notifications(&self) -> &NotificationLog {
        &self.notifications
    }

    pub fn notify(&mut self, notification: Notification) {
        self.notifications.append(notification);
    }

    /// Drop all history, keeping capacities.
    pub fn clear(&mut self) {
        for signal in Signal::ALL {
            self.buffer_mut(signal).clear();
        }
        self.led_status = None;
        self.timeline.clear();
        self.notifications.clear();
    }

    /// Take a point-in-time view, pairing each signal with its threshold.
    #[must_use]
    pub fn snapshot(&self, thresholds: &Thresholds) -> Snapshot {
        let signals = Signal::ALL
            .iter()
            .map(|&signal| SignalSnapshot {
                signal,
                label: signal.label().to_string(),
                unit: signal.unit().to_string(),
                current: self.current_display(signal),
                samples: self.buffer(signal).samples(),
                threshold: thresholds.get(signal),
            })
            .collect();

        Snapshot {
            signals,
            led_status: self.led_status().to_string(),
            timeline: self
                .timeline
                .iter()
                .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
                .collect(),
            notifications: self.notifications.all(),
            taken_at: Utc::now(),
        }
    }
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable view of one signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub signal: Signal,
    pub label: String,
    pub unit: String,
    /// Display value: the last reading, `NaN` after a malformed payload, or
    /// `unknown` before any reading.
    pub current: String,
    /// Retained samples, oldest first.
    pub samples: Vec<Sample>,
    pub threshold: f64,
}

/// Serializable view of the whole dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub signals: Vec<SignalSnapshot>,
    pub led_status: String,
    /// Shared x-axis labels (`HH:MM:SS`, local time), one per routed message.
    pub timeline: Vec<String>,
    pub notifications: Vec<Notification>,
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    /// The view of one signal.
    #[must_use]
    pub fn signal(&self, signal: Signal) -> Option<&SignalSnapshot> {
        self.signals.iter().find(|s| s.signal == signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_dashboard_shows_unknown() {
        let dashboard = Dashboard::new();
        for signal in Signal::ALL {
            assert_eq!(dashboard.current_display(signal), UNKNOWN);
        }
        assert_eq!(dashboard.led_status(), UNKNOWN);
        assert!(dashboard.timeline().is_empty());
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let mut dashboard = Dashboard::new();
        dashboard.buffer_mut(Signal::Humidity).append(48.0);
        dashboard.set_led_status("on");
        dashboard.tick(Utc::now());

        let thresholds = Thresholds::new();
        thresholds.set(Signal::Humidity, 60.0);

        let snapshot = dashboard.snapshot(&thresholds);
        let humidity = snapshot.signal(Signal::Humidity).unwrap();
        assert_eq!(humidity.current, "48");
        assert_eq!(humidity.unit, "%");
        assert_eq!(humidity.samples.len(), 1);
        assert_eq!(humidity.threshold, 60.0);
        assert_eq!(snapshot.signal(Signal::Gas).unwrap().current, UNKNOWN);
        assert_eq!(snapshot.led_status, "on");
        assert_eq!(snapshot.timeline.len(), 1);
        assert_eq!(snapshot.timeline[0].len(), "00:00:00".len());
    }

    #[test]
    fn test_clear_resets_history() {
        let mut dashboard = Dashboard::with_limits(5, Some(2));
        dashboard.buffer_mut(Signal::Gas).append(1.0);
        dashboard.set_led_status("off");
        dashboard.tick(Utc::now());
        dashboard.clear();

        assert!(dashboard.buffer(Signal::Gas).is_empty());
        assert_eq!(dashboard.buffer(Signal::Gas).capacity(), 5);
        assert_eq!(dashboard.led_status(), UNKNOWN);
        assert!(dashboard.timeline().is_empty());
        assert_eq!(dashboard.notifications().max_entries(), Some(2));
    }

    #[test]
    fn test_snapshot_serializes_nan_as_null() {
        let mut dashboard = Dashboard::new();
        dashboard.buffer_mut(Signal::Temperature).append(f64::NAN);
        let snapshot = dashboard.snapshot(&Thresholds::new());

        let json = serde_json::to_value(&snapshot).unwrap();
        let temperature = &json["signals"][1];
        assert_eq!(temperature["current"], "NaN");
        assert!(temperature["samples"][0]["value"].is_null());
    }
}
