//! Rendering of values and identifiers into GoogleSQL statement text.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use std::fmt::Write;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;
use crate::types::Value;

/// Sanitizes an identifier for safe backtick quoting.
///
/// Rejects empty identifiers and identifiers containing control characters. Backticks and
/// backslashes are escaped so the result can be wrapped in backticks without altering the
/// identifier or allowing statement breaks.
pub fn sanitize_identifier(identifier: &str, context: &str) -> SyncResult<String> {
    if identifier.is_empty() {
        bail!(
            ErrorKind::InvalidIdentifier,
            "Invalid identifier",
            format!("{context} cannot be empty")
        );
    }

    if identifier.chars().any(char::is_control) {
        bail!(
            ErrorKind::InvalidIdentifier,
            "Invalid identifier",
            format!("{context} contains control characters")
        );
    }

    let mut escaped = String::with_capacity(identifier.len());
    for ch in identifier.chars() {
        match ch {
            '`' => escaped.push_str("\\`"),
            '\\' => escaped.push_str("\\\\"),
            _ => escaped.push(ch),
        }
    }

    Ok(escaped)
}

/// Sanitizes a column name and wraps it in backticks.
pub fn quote_identifier(identifier: &str, context: &str) -> SyncResult<String> {
    let sanitized = sanitize_identifier(identifier, context)?;

    Ok(format!("`{sanitized}`"))
}

/// Renders `value` as a literal usable as a statement argument.
///
/// Strings become single-quoted string literals, timestamps and dates become
/// `TIMESTAMP('<rfc3339>')`, numbers and booleans use their canonical spelling and null
/// becomes `NULL`. Bytes and JSON values have no literal rule and fail with
/// [`ErrorKind::UnsupportedValueType`].
pub fn format_literal(value: &Value) -> SyncResult<String> {
    let literal = match value {
        Value::Null => "NULL".to_owned(),
        Value::Bool(value) => value.to_string(),
        Value::Int64(value) => value.to_string(),
        Value::Float64(value) => format_float(*value),
        Value::String(value) => quote_string(value),
        Value::Timestamp(_) | Value::Date(_) => {
            // Both variants always denote an instant.
            let instant = value.as_instant().ok_or_else(|| {
                sync_error!(
                    ErrorKind::InvalidData,
                    "Date is not representable as an instant",
                    value
                )
            })?;

            format_timestamp(&instant)
        }
        Value::Bytes(_) | Value::Json(_) => {
            bail!(
                ErrorKind::UnsupportedValueType,
                "Value has no literal representation",
                value.type_name()
            );
        }
    };

    Ok(literal)
}

/// Renders an instant as `TIMESTAMP('<rfc3339>')`.
pub fn format_timestamp(instant: &DateTime<Utc>) -> String {
    format!("TIMESTAMP('{}')", format_rfc3339(instant))
}

/// Renders an instant as an RFC 3339 UTC string truncated to microseconds.
///
/// BigQuery timestamps have microsecond precision and reject longer fractions.
pub fn format_rfc3339(instant: &DateTime<Utc>) -> String {
    instant
        .trunc_subsecs(6)
        .to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Renders a pre-formatted instant string as `TIMESTAMP(<string literal>)`.
pub fn format_timestamp_str(instant: &str) -> String {
    format!("TIMESTAMP({})", quote_string(instant))
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "CAST('NaN' AS FLOAT64)".to_owned()
    } else if value.is_infinite() && value.is_sign_positive() {
        "CAST('inf' AS FLOAT64)".to_owned()
    } else if value.is_infinite() {
        "CAST('-inf' AS FLOAT64)".to_owned()
    } else {
        let rendered = value.to_string();
        // Keep float literals typed as FLOAT64 in the statement.
        if rendered.contains('.') {
            rendered
        } else {
            format!("{rendered}.0")
        }
    }
}

/// Quotes `value` as a single-quoted GoogleSQL string literal.
fn quote_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            ch if ch.is_control() => {
                let _ = write!(quoted, "\\u{:04x}", ch as u32);
            }
            ch => quoted.push(ch),
        }
    }
    quoted.push('\'');

    quoted
}
