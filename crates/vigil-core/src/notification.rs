//! Alert notifications and the session's notification log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use vigil_protocol::Signal;

/// An alert raised when a reading exceeds its signal's threshold.
///
/// Notifications are immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Signal that breached.
    pub signal: Signal,
    /// Observed value.
    pub value: f64,
    /// Threshold in force when the value was evaluated.
    pub threshold: f64,
    /// When the evaluation ran. This is taken separately from the sample's
    /// own ingestion timestamp.
    pub raised_at: DateTime<Utc>,
    /// Human-readable alert text.
    pub message: String,
}

/// Append-only log of notifications, most recent last.
///
/// Unbounded unless built with [`NotificationLog::bounded`], in which case
/// the oldest entries are evicted once the bound is reached.
#[derive(Debug, Clone, Default)]
pub struct NotificationLog {
    entries: VecDeque<Notification>,
    max_entries: Option<usize>,
}

impl NotificationLog {
    /// An unbounded log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A log retaining at most `max_entries` notifications.
    #[must_use]
    pub fn bounded(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: Some(max_entries.max(1)),
        }
    }

    /// Build a log from an optional bound.
    #[must_use]
    pub fn with_limit(max_entries: Option<usize>) -> Self {
        match max_entries {
            Some(max) => Self::bounded(max),
            None => Self::new(),
        }
    }

    pub fn append(&mut self, notification: Notification) {
        self.entries.push_back(notification);
        if let Some(max) = self.max_entries {
            while self.entries.len() > max {
                self.entries.pop_front();
            }
        }
    }

    /// All retained notifications in arrival order.
    #[must_use]
    pub fn all(&self) -> Vec<Notification> {
        self.entries.iter().cloned().collect()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Notification> {
        self.entries.back()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
