//! Wire timestamp codec.
//!
//! The service stamps events with decimal seconds since the Unix epoch,
//! usually as a string (`"1609459200.000200"`), occasionally as a bare JSON
//! number. Both decode into [`TimeString`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{RtmError, RtmResult};

/// Display format: abbreviated weekday, abbreviated month, space-padded day.
const DISPLAY_FORMAT: &str = "%a %b %e";

/// Render a wire timestamp as a short UTC date (`"Fri Jan  1"`).
///
/// An empty input renders as an empty string. Anything that is not a finite
/// decimal number inside the representable date range is rejected with
/// [`RtmError::MalformedTimestamp`].
pub fn parse(raw: &str) -> RtmResult<String> {
    if raw.is_empty() {
        return Ok(String::new());
    }
    Ok(to_datetime(raw)?.format(DISPLAY_FORMAT).to_string())
}

fn to_datetime(raw: &str) -> RtmResult<DateTime<Utc>> {
    let value: f64 = raw
        .parse()
        .map_err(|_| RtmError::malformed_timestamp(raw))?;
    if !value.is_finite() {
        return Err(RtmError::malformed_timestamp(raw));
    }

    let secs = value.floor();
    if secs < i64::MIN as f64 || secs >= i64::MAX as f64 {
        return Err(RtmError::malformed_timestamp(raw));
    }
    let nanos = (((value - secs) * 1e9) as u32).min(999_999_999);

    DateTime::from_timestamp(secs as i64, nanos).ok_or_else(|| RtmError::malformed_timestamp(raw))
}

/// A timestamp exactly as the service sent it.
///
/// Serializes as a string; deserializes from a string or a number.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TimeString(String);

impl TimeString {
    /// Wrap a raw wire value.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw wire value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short display form, see [`parse`].
    pub fn display(&self) -> RtmResult<String> {
        parse(&self.0)
    }

    /// Full-precision UTC instant.
    pub fn to_datetime(&self) -> RtmResult<DateTime<Utc>> {
        to_datetime(&self.0)
    }
}

impl fmt::Display for TimeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TimeString {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for TimeString {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl Serialize for TimeString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TimeString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Self(text),
            Raw::Number(number) => Self(number.to_string()),
        })
    }
}
