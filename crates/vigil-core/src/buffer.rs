//! Rolling sample buffers.
//!
//! Each signal keeps a fixed-capacity window of its most recent samples.
//! Appending past capacity evicts from the head, so a buffer always holds
//! exactly the last `min(appended, capacity)` samples in arrival order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of samples retained per signal.
pub const DEFAULT_WINDOW: usize = 20;

/// A fixed-capacity, oldest-evicted window of values.
#[derive(Debug, Clone)]
pub struct Window<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Window<T> {
    /// Create a window retaining at most `capacity` items.
    ///
    /// A capacity of zero is bumped to one so the latest item is always kept.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push an item to the tail, evicting from the head when full.
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    /// The most recently pushed item.
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T> Default for Window<T> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_WINDOW)
    }
}

/// A reading together with the moment it was ingested.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Parsed value; NaN when the payload was malformed.
    pub value: f64,
    /// Ingestion time, taken by the monitor rather than the sender.
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    #[must_use]
    pub fn new(value: f64, timestamp: DateTime<Utc>) -> Self {
        Self { value, timestamp }
    }

    /// Create a sample stamped with the current time.
    #[must_use]
    pub fn now(value: f64) -> Self {
        Self::new(value, Utc::now())
    }
}

/// Rolling history of one signal.
#[derive(Debug, Clone, Default)]
pub struct SignalBuffer {
    samples: Window<Sample>,
}

impl SignalBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Window::with_capacity(capacity),
        }
    }

    /// Append a value stamped with the current time.
    pub fn append(&mut self, value: f64) {
        self.push(Sample::now(value));
    }

    /// Append a pre-stamped sample.
    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// The last appended value, or `None` before the first reading.
    #[must_use]
    pub fn current(&self) -> Option<f64> {
        self.samples.last().map(|s| s.value)
    }

    /// Retained values, oldest first.
    #[must_use]
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    /// Retained samples, oldest first.
    #[must_use]
    pub fn samples(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.samples.capacity()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
