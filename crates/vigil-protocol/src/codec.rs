//! Payload codec for the Vigil topics.
//!
//! Sensor payloads are ASCII decimal numbers, status payloads are free text,
//! and the command payload is a single opcode byte. Numeric parsing follows
//! the leading-prefix rule: surrounding whitespace and trailing garbage are
//! tolerated, a payload with no numeric prefix reads as not-a-number.

use bytes::Bytes;
use thiserror::Error;

use crate::topic::{Direction, LedCommand, Topic};

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Topic is not part of the fixed topic set.
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// Sensor payload has no numeric prefix.
    #[error("Malformed payload: {0:?}")]
    MalformedPayload(String),

    /// Signal name is not one of the monitored signals.
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),
}

/// A decoded inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Numeric sensor reading, possibly NaN for malformed input.
    Reading(f64),
    /// Device status text, verbatim.
    Status(String),
}

/// Decode an inbound payload according to its topic.
///
/// Returns `None` for outbound topics, which the monitor never consumes.
#[must_use]
pub fn decode(topic: Topic, payload: &[u8]) -> Option<Payload> {
    if topic.direction() == Direction::Outbound {
        return None;
    }
    if topic.signal().is_some() {
        Some(Payload::Reading(reading_or_nan(payload)))
    } else {
        Some(Payload::Status(decode_status(payload)))
    }
}

/// Parse a sensor reading.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the payload does not start
/// with a number.
pub fn parse_reading(payload: &[u8]) -> Result<f64, ProtocolError> {
    let text = String::from_utf8_lossy(payload);
    let prefix = numeric_prefix(text.trim_start());
    if prefix.is_empty() {
        return Err(ProtocolError::MalformedPayload(text.to_string()));
    }
    prefix
        .parse::<f64>()
        .map_err(|_| ProtocolError::MalformedPayload(text.to_string()))
}

/// Parse a sensor reading, mapping malformed input to NaN.
#[must_use]
pub fn reading_or_nan(payload: &[u8]) -> f64 {
    parse_reading(payload).unwrap_or(f64::NAN)
}

/// Decode a status payload. Invalid UTF-8 is replaced, not rejected.
#[must_use]
pub fn decode_status(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

/// Encode an LED command payload.
#[must_use]
pub fn encode_command(command: LedCommand) -> Bytes {
    Bytes::from_static(command.opcode().as_bytes())
}

/// Render a reading the way it is displayed: integral values without a
/// fractional part, `NaN` and `Infinity` spelled out, negative zero as `0`,
/// and magnitudes of at least `1e21` or below `1e-6` in exponent form
/// (`1e+21`, `1.5e-7`).
#[must_use]
pub fn format_reading(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    let magnitude = value.abs();
    if !(1e-6..1e21).contains(&magnitude) {
        let formatted = format!("{value:e}");
        return match formatted.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{mantissa}e+{exponent}")
            }
            _ => formatted,
        };
    }
    value.to_string()
}

/// The longest prefix of `text` that reads as a decimal number.
fn numeric_prefix(text: &str) -> &str {
    let bytes = text.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    if text[end..].starts_with("Infinity") {
        return &text[..end + "Infinity".len()];
    }

    let int_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut digits = end - int_start;

    if bytes.get(end) == Some(&b'.') {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while bytes.get(frac_end).is_some_and(u8::is_ascii_digit) {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }

    if digits == 0 {
        return "";
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }

    &text[..end]
}
