//! Decoding of BigQuery REST payloads into [`Row`]s and row-level insert errors.
//!
//! Query results arrive as a schema plus rows of positional cells (`rows[].f[].v`) whose
//! scalar values are all strings. Cells are converted to typed [`Value`]s by the declared
//! field type.
//!
//! The payload structs below mirror only the fields read from the client's response models.
//! They build without the `bigquery` feature, so decoding is tested in the default build, and
//! they accept `insertErrors[].index` as a number or a string.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;
use crate::types::{Row, Value};
use crate::warehouse::InsertRowError;

/// One page of a query response or of a query results listing.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryPage {
    #[serde(default)]
    pub schema: Option<TableSchema>,
    #[serde(default)]
    pub rows: Option<Vec<TableRow>>,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub job_complete: Option<bool>,
    #[serde(default)]
    pub errors: Option<Vec<ErrorProto>>,
    #[serde(default)]
    pub job_reference: Option<JobReference>,
}

impl QueryPage {
    /// Parses a page from any serializable response model.
    pub fn from_response<T: serde::Serialize>(response: &T) -> SyncResult<QueryPage> {
        let value = serde_json::to_value(response)?;

        Ok(serde_json::from_value(value)?)
    }

    /// Returns the messages of the page's `errors` list.
    ///
    /// The list also carries warnings of jobs that succeeded. Failed statements are reported as
    /// HTTP errors by the client instead.
    pub fn messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .flatten()
            .map(ErrorProto::to_string)
            .collect()
    }

    /// Returns the fields of the page schema, empty when the page carries none.
    pub fn fields(&self) -> &[FieldSchema] {
        self.schema
            .as_ref()
            .and_then(|schema| schema.fields.as_deref())
            .unwrap_or_default()
    }

    pub fn rows(&self) -> &[TableRow] {
        self.rows.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub(crate) struct TableSchema {
    #[serde(default)]
    pub fields: Option<Vec<FieldSchema>>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub fields: Option<Vec<FieldSchema>>,
}

impl FieldSchema {
    fn is_repeated(&self) -> bool {
        self.mode
            .as_deref()
            .is_some_and(|mode| mode.eq_ignore_ascii_case("REPEATED"))
    }

    fn is_record(&self) -> bool {
        matches!(
            self.field_type.to_ascii_uppercase().as_str(),
            "RECORD" | "STRUCT"
        )
    }

    fn subfields(&self) -> &[FieldSchema] {
        self.fields.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub(crate) struct TableRow {
    #[serde(default)]
    pub f: Option<Vec<TableCell>>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub(crate) struct TableCell {
    #[serde(default)]
    pub v: serde_json::Value,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobReference {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub(crate) struct ErrorProto {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl std::fmt::Display for ErrorProto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.reason, &self.message) {
            (Some(reason), Some(message)) => write!(f, "{reason}: {message}"),
            (Some(reason), None) => f.write_str(reason),
            (None, Some(message)) => f.write_str(message),
            (None, None) => f.write_str("unknown error"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Option<Vec<InsertErrors>>,
}

#[derive(Debug, Default, Deserialize)]
struct InsertErrors {
    #[serde(default)]
    index: serde_json::Value,
    #[serde(default)]
    errors: Option<Vec<ErrorProto>>,
}

/// Decodes the rows of a page using the given schema fields.
pub(crate) fn decode_rows(fields: &[FieldSchema], rows: &[TableRow]) -> SyncResult<Vec<Row>> {
    rows.iter().map(|row| decode_row(fields, row)).collect()
}

fn decode_row(fields: &[FieldSchema], row: &TableRow) -> SyncResult<Row> {
    let cells = row.f.as_deref().unwrap_or_default();
    if cells.len() != fields.len() {
        bail!(
            ErrorKind::DeserializationError,
            "BigQuery row does not match its schema",
            format!("{} cells for {} fields", cells.len(), fields.len())
        );
    }

    let mut decoded = Row::with_capacity(fields.len());
    for (field, cell) in fields.iter().zip(cells) {
        decoded.set(field.name.clone(), decode_cell(field, &cell.v)?);
    }

    Ok(decoded)
}

/// Converts a single cell value into a [`Value`] according to its field schema.
fn decode_cell(field: &FieldSchema, cell: &serde_json::Value) -> SyncResult<Value> {
    if cell.is_null() {
        return Ok(Value::Null);
    }

    if field.is_repeated() || field.is_record() {
        return Ok(Value::Json(cell_to_json(field, cell)?));
    }

    let Some(raw) = cell.as_str() else {
        bail!(
            ErrorKind::DeserializationError,
            "BigQuery scalar cell is not a string",
            format!("field `{}` holds {cell}", field.name)
        );
    };

    decode_scalar(field, raw)
}

fn decode_scalar(field: &FieldSchema, raw: &str) -> SyncResult<Value> {
    let invalid = |expected: &str| {
        sync_error!(
            ErrorKind::DeserializationError,
            "BigQuery cell does not match its field type",
            format!("field `{}` expected {expected}, got `{raw}`", field.name)
        )
    };

    let value = match field.field_type.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" => Value::Int64(raw.parse().map_err(|_| invalid("an integer"))?),
        "FLOAT" | "FLOAT64" => Value::Float64(raw.parse().map_err(|_| invalid("a float"))?),
        "BOOLEAN" | "BOOL" => match raw.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(invalid("a boolean")),
        },
        "TIMESTAMP" => {
            let seconds: f64 = raw.parse().map_err(|_| invalid("epoch seconds"))?;
            let micros = (seconds * 1_000_000.0).round() as i64;
            let timestamp =
                DateTime::from_timestamp_micros(micros).ok_or_else(|| invalid("epoch seconds"))?;
            Value::Timestamp(timestamp)
        }
        "DATE" => Value::Date(
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid("a date"))?,
        ),
        "DATETIME" => {
            let datetime = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
                .map_err(|_| invalid("a datetime"))?;
            Value::Timestamp(datetime.and_utc())
        }
        "BYTES" => Value::Bytes(STANDARD.decode(raw).map_err(|_| invalid("base64 bytes"))?),
        _ => Value::String(raw.to_owned()),
    };

    Ok(value)
}

/// Unwraps the `{"v": ...}` and `{"f": [...]}` envelopes of nested cells into plain JSON.
fn cell_to_json(field: &FieldSchema, cell: &serde_json::Value) -> SyncResult<serde_json::Value> {
    if cell.is_null() {
        return Ok(serde_json::Value::Null);
    }

    if field.is_repeated() {
        let Some(items) = cell.as_array() else {
            bail!(
                ErrorKind::DeserializationError,
                "BigQuery repeated cell is not an array",
                format!("field `{}`", field.name)
            );
        };

        let element = FieldSchema {
            mode: None,
            ..field.clone()
        };
        let values = items
            .iter()
            .map(|item| cell_to_json(&element, item.get("v").unwrap_or(item)))
            .collect::<SyncResult<Vec<_>>>()?;

        return Ok(serde_json::Value::Array(values));
    }

    if field.is_record() {
        let cells = cell
            .get("f")
            .and_then(serde_json::Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut object = serde_json::Map::new();
        for (subfield, subcell) in field.subfields().iter().zip(cells) {
            let subvalue = subcell.get("v").unwrap_or(&serde_json::Value::Null);
            object.insert(subfield.name.clone(), cell_to_json(subfield, subvalue)?);
        }

        return Ok(serde_json::Value::Object(object));
    }

    let Some(raw) = cell.as_str() else {
        return Ok(cell.clone());
    };

    let json = match decode_scalar(field, raw)? {
        Value::Int64(value) => serde_json::Value::from(value),
        Value::Bool(value) => serde_json::Value::Bool(value),
        Value::Float64(value) if value.is_finite() => serde_json::Value::from(value),
        value => serde_json::to_value(&value)?,
    };

    Ok(json)
}

/// Extracts the per-row errors of a streaming insert response.
///
/// Errors reported for the same row are merged into a single entry. Entries are sorted by row
/// index.
pub(crate) fn decode_insert_errors<T: serde::Serialize>(
    response: &T,
) -> SyncResult<Vec<InsertRowError>> {
    let response: InsertAllResponse = serde_json::from_value(serde_json::to_value(response)?)?;

    let mut by_index: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for insert_errors in response.insert_errors.unwrap_or_default() {
        let index = match &insert_errors.index {
            serde_json::Value::Number(number) => number.as_u64(),
            serde_json::Value::String(index) => index.parse().ok(),
            _ => None,
        };
        let Some(index) = index.and_then(|index| usize::try_from(index).ok()) else {
            bail!(
                ErrorKind::DeserializationError,
                "BigQuery insert error has no row index",
                insert_errors.index
            );
        };

        let messages = by_index.entry(index).or_default();
        messages.extend(
            insert_errors
                .errors
                .unwrap_or_default()
                .iter()
                .map(ErrorProto::to_string),
        );
    }

    Ok(by_index
        .into_iter()
        .map(|(index, messages)| InsertRowError::new(index, messages))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn page(value: serde_json::Value) -> QueryPage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_decode_typed_rows() {
        let page = page(json!({
            "jobComplete": true,
            "schema": {"fields": [
                {"name": "id", "type": "INTEGER", "mode": "NULLABLE"},
                {"name": "amount", "type": "FLOAT"},
                {"name": "active", "type": "BOOLEAN"},
                {"name": "at", "type": "TIMESTAMP"},
                {"name": "day", "type": "DATE"},
                {"name": "name", "type": "STRING"},
                {"name": "raw", "type": "BYTES"},
                {"name": "missing", "type": "STRING"}
            ]},
            "rows": [{"f": [
                {"v": "7"},
                {"v": "1.5"},
                {"v": "true"},
                {"v": "1.5778368E9"},
                {"v": "2020-01-01"},
                {"v": "x"},
                {"v": "aGk="},
                {"v": null}
            ]}]
        }));

        let rows = decode_rows(page.fields(), page.rows()).unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get("id"), Some(&Value::Int64(7)));
        assert_eq!(row.get("amount"), Some(&Value::Float64(1.5)));
        assert_eq!(row.get("active"), Some(&Value::Bool(true)));
        assert_eq!(
            row.get("at"),
            Some(&Value::Timestamp(
                Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
            ))
        );
        assert_eq!(
            row.get("day"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()))
        );
        assert_eq!(row.get("name"), Some(&Value::from("x")));
        assert_eq!(row.get("raw"), Some(&Value::Bytes(b"hi".to_vec())));
        assert_eq!(row.get("missing"), Some(&Value::Null));
    }

    #[test]
    fn test_decode_nested_cells_as_json() {
        let page = page(json!({
            "schema": {"fields": [
                {"name": "tags", "type": "STRING", "mode": "REPEATED"},
                {"name": "point", "type": "RECORD", "fields": [
                    {"name": "x", "type": "INTEGER"},
                    {"name": "y", "type": "INTEGER"}
                ]}
            ]},
            "rows": [{"f": [
                {"v": [{"v": "a"}, {"v": "b"}]},
                {"v": {"f": [{"v": "1"}, {"v": "2"}]}}
            ]}]
        }));

        let rows = decode_rows(page.fields(), page.rows()).unwrap();

        assert_eq!(rows[0].get("tags"), Some(&Value::Json(json!(["a", "b"]))));
        assert_eq!(
            rows[0].get("point"),
            Some(&Value::Json(json!({"x": 1, "y": 2})))
        );
    }

    #[test]
    fn test_decode_rejects_mismatched_cells() {
        let page = page(json!({
            "schema": {"fields": [{"name": "id", "type": "INTEGER"}]},
            "rows": [{"f": [{"v": "abc"}]}]
        }));

        let err = decode_rows(page.fields(), page.rows()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DeserializationError);
    }

    #[test]
    fn test_page_warnings_do_not_fail_decoding() {
        let page = page(json!({
            "jobComplete": true,
            "schema": {"fields": [{"name": "id", "type": "INTEGER"}]},
            "rows": [{"f": [{"v": "7"}]}],
            "errors": [{"reason": "warning", "message": "Query used a deprecated function"}]
        }));

        assert_eq!(
            page.messages(),
            vec!["warning: Query used a deprecated function".to_owned()]
        );
        let rows = decode_rows(page.fields(), page.rows()).unwrap();
        assert_eq!(rows, vec![Row::new().with_column("id", 7i64)]);
    }

    #[test]
    fn test_malformed_cells_are_deserialization_errors() {
        let page = page(json!({
            "schema": {"fields": [{"name": "day", "type": "DATE"}]},
            "rows": [{"f": [{"v": "not-a-date"}]}]
        }));

        let err = decode_rows(page.fields(), page.rows()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DeserializationError);
        assert!(!err.is_validation());
    }

    #[test]
    fn test_decode_insert_errors_merges_by_index() {
        let response = json!({
            "kind": "bigquery#tableDataInsertAllResponse",
            "insertErrors": [
                {"index": 2, "errors": [{"reason": "invalid", "message": "bad date"}]},
                {"index": 0, "errors": [{"reason": "stopped"}]},
                {"index": 2, "errors": [{"message": "bad id"}]}
            ]
        });

        let errors = decode_insert_errors(&response).unwrap();

        assert_eq!(
            errors,
            vec![
                InsertRowError::new(0, vec!["stopped".to_owned()]),
                InsertRowError::new(
                    2,
                    vec!["invalid: bad date".to_owned(), "bad id".to_owned()]
                ),
            ]
        );
    }

    #[test]
    fn test_decode_insert_errors_without_errors() {
        let errors = decode_insert_errors(&json!({"kind": "x"})).unwrap();

        assert!(errors.is_empty());
    }
}
