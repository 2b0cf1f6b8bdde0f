//! Threshold configuration and evaluation.
//!
//! Thresholds are shared, externally mutable values read at evaluation
//! time. Changing one affects the next reading only; past samples are never
//! re-evaluated.

use chrono::{DateTime, Local};
use dashmap::DashMap;
use tracing::debug;
use vigil_protocol::{format_reading, Signal};

use crate::notification::Notification;

/// Per-signal alert thresholds.
#[derive(Debug)]
pub struct Thresholds {
    values: DashMap<Signal, f64>,
}

impl Thresholds {
    /// Thresholds initialised to each signal's default.
    #[must_use]
    pub fn new() -> Self {
        let values = DashMap::with_capacity(Signal::ALL.len());
        for signal in Signal::ALL {
            values.insert(signal, signal.default_threshold());
        }
        Self { values }
    }

    /// Build from explicit values, falling back to defaults for the rest.
    #[must_use]
    pub fn from_values(values: impl IntoIterator<Item = (Signal, f64)>) -> Self {
        let thresholds = Self::new();
        for (signal, value) in values {
            thresholds.set(signal, value);
        }
        thresholds
    }

    /// Current threshold for a signal.
    #[must_use]
    pub fn get(&self, signal: Signal) -> f64 {
        self.values
            .get(&signal)
            .map(|v| *v)
            .unwrap_or_else(|| signal.default_threshold())
    }

    /// Replace a threshold, returning the previous value.
    pub fn set(&self, signal: Signal, value: f64) -> f64 {
        let previous = self
            .values
            .insert(signal, value)
            .unwrap_or_else(|| signal.default_threshold());
        debug!(signal = %signal, previous, value, "Threshold updated");
        previous
    }

    /// All thresholds in display order.
    #[must_use]
    pub fn all(&self) -> Vec<(Signal, f64)> {
        Signal::ALL.iter().map(|&s| (s, self.get(s))).collect()
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluate a reading against a threshold, stamping any alert with the
/// current local time.
#[must_use]
pub fn evaluate(signal: Signal, value: f64, threshold: f64) -> Option<Notification> {
    evaluate_at(signal, value, threshold, Local::now())
}

/// Evaluate a reading against a threshold at a given moment.
///
/// Fires only when `value > threshold`. NaN never fires.
#[must_use]
pub fn evaluate_at(
    signal: Signal,
    value: f64,
    threshold: f64,
    at: DateTime<Local>,
) -> Option<Notification> {
    let breached = value > threshold;
    if !breached {
        return None;
    }

    let unit = signal.unit();
    let message = format!(
        "{} alert: {}{} exceeds threshold {}{} at {}",
        signal.label(),
        format_reading(value),
        unit,
        format_reading(threshold),
        unit,
        at.format("%H:%M:%S"),
    );

    Some(Notification {
        signal,
        value,
        threshold,
        raised_at: at.into(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap()
    }

    #[test]
    fn test_defaults() {
        let thresholds = Thresholds::new();
        assert_eq!(thresholds.get(Signal::Gas), 4000.0);
        assert_eq!(thresholds.get(Signal::Temperature), 30.0);
        assert_eq!(thresholds.get(Signal::Humidity), 70.0);
    }

    #[test]
    fn test_set_returns_previous() {
        let thresholds = Thresholds::new();
        assert_eq!(thresholds.set(Signal::Gas, 3500.0), 4000.0);
        assert_eq!(thresholds.get(Signal::Gas), 3500.0);
    }

    #[test]
    fn test_from_values() {
        let thresholds = Thresholds::from_values([(Signal::Humidity, 55.0)]);
        assert_eq!(thresholds.get(Signal::Humidity), 55.0);
        assert_eq!(thresholds.get(Signal::Gas), 4000.0);
        assert_eq!(thresholds.all().len(), 3);
    }

    #[test]
    fn test_strict_comparison() {
        assert!(evaluate_at(Signal::Gas, 4000.0, 4000.0, noon()).is_none());
        assert!(evaluate_at(Signal::Gas, 4000.5, 4000.0, noon()).is_some());
        assert!(evaluate_at(Signal::Gas, 3999.0, 4000.0, noon()).is_none());
    }

    #[test]
    fn test_nan_never_alerts() {
        assert!(evaluate_at(Signal::Temperature, f64::NAN, 30.0, noon()).is_none());
        assert!(evaluate_at(Signal::Temperature, 100.0, f64::NAN, noon()).is_none());
    }

    #[test]
    fn test_threshold_monotonic() {
        let value = 42.0;
        assert!(evaluate_at(Signal::Humidity, value, 41.0, noon()).is_some());
        assert!(evaluate_at(Signal::Humidity, value, 43.0, noon()).is_none());
    }

    #[test]
    fn test_message_format() {
        let alert = evaluate_at(Signal::Temperature, 31.5, 30.0, noon()).unwrap();
        assert_eq!(
            alert.message,
            "Temperature alert: 31.5°C exceeds threshold 30°C at 12:30:15"
        );
        assert_eq!(alert.signal, Signal::Temperature);
        assert_eq!(alert.value, 31.5);
        assert_eq!(alert.threshold, 30.0);

        let gas = evaluate_at(Signal::Gas, 4500.0, 4000.0, noon()).unwrap();
        assert_eq!(
            gas.message,
            "Gas alert: 4500 exceeds threshold 4000 at 12:30:15"
        );
    }
}
