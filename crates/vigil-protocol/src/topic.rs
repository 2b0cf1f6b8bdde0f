//! The fixed topic set of the Vigil broker feed.
//!
//! Topics are matched by exact, case-sensitive string equality. Anything
//! outside this closed set is not part of the feed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::codec::ProtocolError;

/// Raw gas sensor reading.
pub const GAS_VALUE_TOPIC: &str = "gas/value";
/// Temperature in degrees Celsius.
pub const TEMPERATURE_TOPIC: &str = "dht/temperature";
/// Relative humidity in percent.
pub const HUMIDITY_TOPIC: &str = "dht/humidity";
/// Free-text LED status label.
pub const LED_STATUS_TOPIC: &str = "led/status";
/// Outbound LED actuation command.
pub const LED_COMMAND_TOPIC: &str = "led/control";

/// Direction of traffic on a topic, seen from the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Published by devices, consumed by the monitor.
    Inbound,
    /// Published by the monitor, consumed by devices.
    Outbound,
}

/// A topic on the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "&'static str", try_from = "String")]
pub enum Topic {
    GasValue,
    Temperature,
    Humidity,
    LedStatus,
    LedControl,
}

impl Topic {
    /// Topics subscribed on every connect, in subscription order.
    pub const SUBSCRIPTIONS: [Topic; 4] = [
        Topic::GasValue,
        Topic::Temperature,
        Topic::Humidity,
        Topic::LedStatus,
    ];

    /// The wire name of the topic.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Topic::GasValue => GAS_VALUE_TOPIC,
            Topic::Temperature => TEMPERATURE_TOPIC,
            Topic::Humidity => HUMIDITY_TOPIC,
            Topic::LedStatus => LED_STATUS_TOPIC,
            Topic::LedControl => LED_COMMAND_TOPIC,
        }
    }

    /// Look up a topic by its exact wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Topic> {
        match name {
            GAS_VALUE_TOPIC => Some(Topic::GasValue),
            TEMPERATURE_TOPIC => Some(Topic::Temperature),
            HUMIDITY_TOPIC => Some(Topic::Humidity),
            LED_STATUS_TOPIC => Some(Topic::LedStatus),
            LED_COMMAND_TOPIC => Some(Topic::LedControl),
            _ => None,
        }
    }

    #[must_use]
    pub const fn direction(self) -> Direction {
        match self {
            Topic::LedControl => Direction::Outbound,
            _ => Direction::Inbound,
        }
    }

    /// The sensor signal carried on this topic, if it is a sensor topic.
    #[must_use]
    pub const fn signal(self) -> Option<Signal> {
        match self {
            Topic::GasValue => Some(Signal::Gas),
            Topic::Temperature => Some(Signal::Temperature),
            Topic::Humidity => Some(Signal::Humidity),
            Topic::LedStatus | Topic::LedControl => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Topic> for &'static str {
    fn from(topic: Topic) -> &'static str {
        topic.as_str()
    }
}

impl TryFrom<&str> for Topic {
    type Error = ProtocolError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Topic::parse(value).ok_or_else(|| ProtocolError::UnknownTopic(value.to_string()))
    }
}

impl TryFrom<String> for Topic {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Topic::try_from(value.as_str())
    }
}

/// A monitored sensor quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Gas,
    Temperature,
    Humidity,
}

impl Signal {
    /// All signals, in display order.
    pub const ALL: [Signal; 3] = [Signal::Gas, Signal::Temperature, Signal::Humidity];

    /// Lowercase identifier used in configuration and URLs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Signal::Gas => "gas",
            Signal::Temperature => "temperature",
            Signal::Humidity => "humidity",
        }
    }

    /// Human-readable label used in alert messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Signal::Gas => "Gas",
            Signal::Temperature => "Temperature",
            Signal::Humidity => "Humidity",
        }
    }

    /// Unit suffix appended to values of this signal. Gas readings are raw
    /// ADC counts and carry no unit.
    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Signal::Gas => "",
            Signal::Temperature => "°C",
            Signal::Humidity => "%",
        }
    }

    /// The inbound topic carrying this signal.
    #[must_use]
    pub const fn topic(self) -> Topic {
        match self {
            Signal::Gas => Topic::GasValue,
            Signal::Temperature => Topic::Temperature,
            Signal::Humidity => Topic::Humidity,
        }
    }

    /// Threshold applied until one is configured.
    #[must_use]
    pub const fn default_threshold(self) -> f64 {
        match self {
            Signal::Gas => 4000.0,
            Signal::Temperature => 30.0,
            Signal::Humidity => 70.0,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Signal {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gas" => Ok(Signal::Gas),
            "temperature" => Ok(Signal::Temperature),
            "humidity" => Ok(Signal::Humidity),
            other => Err(ProtocolError::InvalidSignal(other.to_string())),
        }
    }
}

/// LED actuation command published on [`LED_COMMAND_TOPIC`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedCommand {
    On,
    Off,
}

impl LedCommand {
    /// The single-byte opcode sent to the device.
    #[must_use]
    pub const fn opcode(self) -> &'static str {
        match self {
            LedCommand::On => "L",
            LedCommand::Off => "D",
        }
    }
}

impl From<bool> for LedCommand {
    fn from(turn_on: bool) -> Self {
        if turn_on {
            LedCommand::On
        } else {
            LedCommand::Off
        }
    }
}
