use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::format::format_rfc3339;

/// A typed scalar stored in a [`crate::types::Row`] column.
///
/// The variant set is closed so that every consumer (formatter, matcher, encoders) can
/// dispatch exhaustively. [`Value::Bytes`] and [`Value::Json`] exist because a warehouse can
/// return binary and nested columns, but they have no statement literal representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl Value {
    /// Returns a short name of the variant, used in error details and logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int64(_) => "int64",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::Date(_) => "date",
            Value::Bytes(_) => "bytes",
            Value::Json(_) => "json",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the instant this value denotes, if it is a timestamp or a date.
    ///
    /// Dates are interpreted as midnight UTC.
    pub fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(timestamp) => Some(*timestamp),
            Value::Date(date) => date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int64(value) => write!(f, "{value}"),
            Value::Float64(value) => write!(f, "{value}"),
            Value::String(value) => write!(f, "{value:?}"),
            Value::Timestamp(value) => f.write_str(&format_rfc3339(value)),
            Value::Date(value) => write!(f, "{}", value.format("%Y-%m-%d")),
            Value::Bytes(value) => write!(f, "<{} bytes>", value.len()),
            Value::Json(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int64(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Maps plain JSON into a [`Value`].
///
/// Integral numbers that fit in an `i64` become [`Value::Int64`], other numbers become
/// [`Value::Float64`]. Arrays and objects are kept as [`Value::Json`]. Strings are never
/// reinterpreted as timestamps here.
impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(value) => Value::Bool(value),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(value) => Value::Int64(value),
                None => Value::Float64(number.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(value) => Value::String(value),
            value @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                Value::Json(value)
            }
        }
    }
}

/// Serializes the value in the JSON shape expected by streaming inserts.
///
/// Timestamps are RFC 3339 strings truncated to microseconds, dates are `YYYY-MM-DD`, bytes
/// are base64 and non-finite floats use the `NaN`/`Infinity`/`-Infinity` string spellings.
impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(value) => serializer.serialize_bool(*value),
            Value::Int64(value) => serializer.serialize_i64(*value),
            Value::Float64(value) if value.is_nan() => serializer.serialize_str("NaN"),
            Value::Float64(value) if value.is_infinite() => {
                if value.is_sign_positive() {
                    serializer.serialize_str("Infinity")
                } else {
                    serializer.serialize_str("-Infinity")
                }
            }
            Value::Float64(value) => serializer.serialize_f64(*value),
            Value::String(value) => serializer.serialize_str(value),
            Value::Timestamp(value) => serializer.serialize_str(&format_rfc3339(value)),
            Value::Date(value) => serializer.collect_str(&value.format("%Y-%m-%d")),
            Value::Bytes(value) => serializer.serialize_str(&STANDARD.encode(value)),
            Value::Json(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}
