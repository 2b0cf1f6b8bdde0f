//! # vigil-core
//!
//! Ingestion and evaluation engine for the Vigil sensor monitor.
//!
//! - **Buffer** - Fixed-capacity rolling window of timestamped samples
//! - **Threshold** - Shared per-signal thresholds and the alert predicate
//! - **Notification** - Alert records and the notification log
//! - **Dashboard** - Observable state and its serializable snapshot
//! - **Router** - Maps inbound `(topic, payload)` pairs onto the dashboard
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│   Router    │────▶│  Dashboard  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │ Thresholds  │
//!                     └─────────────┘
//! ```

pub mod buffer;
pub mod dashboard;
pub mod notification;
pub mod router;
pub mod threshold;

pub use buffer::{Sample, SignalBuffer, Window, DEFAULT_WINDOW};
pub use dashboard::{Dashboard, SignalSnapshot, Snapshot, UNKNOWN};
pub use notification::{Notification, NotificationLog};
pub use router::{RoutedEvent, Router, RouterConfig, RouterStats};
pub use threshold::{evaluate, evaluate_at, Thresholds};
pub use vigil_protocol::Signal;
