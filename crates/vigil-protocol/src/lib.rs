//! # vigil-protocol
//!
//! Topic set and payload codec for the Vigil sensor monitor.
//!
//! Devices publish readings and status on a small, fixed set of MQTT topics
//! and accept a one-byte actuation command:
//!
//! | Topic | Direction | Payload |
//! |---|---|---|
//! | `gas/value` | in | decimal number |
//! | `dht/temperature` | in | decimal number (°C) |
//! | `dht/humidity` | in | decimal number (%) |
//! | `led/status` | in | free text |
//! | `led/control` | out | `L` or `D` |
//!
//! ## Example
//!
//! ```rust
//! use vigil_protocol::{codec, Payload, Topic};
//!
//! let topic = Topic::parse("dht/temperature").unwrap();
//! assert_eq!(codec::decode(topic, b"25.5"), Some(Payload::Reading(25.5)));
//! ```

pub mod codec;
pub mod topic;

pub use codec::{decode, encode_command, format_reading, Payload, ProtocolError};
pub use topic::{Direction, LedCommand, Signal, Topic};
