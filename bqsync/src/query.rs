use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::format::{format_timestamp, format_timestamp_str, quote_identifier};
use crate::types::{TableRef, Value};

/// One end of a date range.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeBound {
    /// A pre-formatted instant, embedded verbatim as a string literal.
    Instant(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
}

impl RangeBound {
    /// Returns the typed instant of this bound, if it is not a pre-formatted string.
    pub fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            RangeBound::Instant(_) => None,
            RangeBound::Timestamp(timestamp) => Some(*timestamp),
            RangeBound::Date(date) => Value::Date(*date).as_instant(),
        }
    }

    fn to_literal(&self) -> String {
        match self {
            RangeBound::Instant(instant) => format_timestamp_str(instant),
            RangeBound::Timestamp(timestamp) => format_timestamp(timestamp),
            RangeBound::Date(date) => {
                let instant = Value::Date(*date).as_instant();
                match instant {
                    Some(instant) => format_timestamp(&instant),
                    None => format_timestamp_str(&date.format("%Y-%m-%d").to_string()),
                }
            }
        }
    }
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeBound::Instant(instant) => f.write_str(instant),
            RangeBound::Timestamp(timestamp) => write!(f, "{}", Value::Timestamp(*timestamp)),
            RangeBound::Date(date) => write!(f, "{}", Value::Date(*date)),
        }
    }
}

impl From<&str> for RangeBound {
    fn from(value: &str) -> Self {
        RangeBound::Instant(value.to_owned())
    }
}

impl From<String> for RangeBound {
    fn from(value: String) -> Self {
        RangeBound::Instant(value)
    }
}

impl From<DateTime<Utc>> for RangeBound {
    fn from(value: DateTime<Utc>) -> Self {
        RangeBound::Timestamp(value)
    }
}

impl From<NaiveDate> for RangeBound {
    fn from(value: NaiveDate) -> Self {
        RangeBound::Date(value)
    }
}

/// Parses an instant spelled as RFC 3339, as a zone-less `YYYY-MM-DD[T| ]HH:MM:SS[.f]` in UTC,
/// or as a `YYYY-MM-DD` date at midnight UTC.
pub fn parse_instant(value: &str) -> SyncResult<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(instant) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(instant.and_utc());
        }
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")?;
    match Value::Date(date).as_instant() {
        Some(instant) => Ok(instant),
        None => bail!(
            ErrorKind::InvalidData,
            "Date is not representable as an instant",
            value
        ),
    }
}

/// A query retrieving the rows of a table whose date column lies within a closed range.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    table: TableRef,
    date_column: String,
    start: RangeBound,
    end: RangeBound,
    sql: String,
}

impl RangeQuery {
    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn date_column(&self) -> &str {
        &self.date_column
    }

    pub fn start(&self) -> &RangeBound {
        &self.start
    }

    pub fn end(&self) -> &RangeBound {
        &self.end
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl fmt::Display for RangeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Builds the query selecting all columns of rows with `date_column` in `[start, end]`,
/// ordered ascending by `date_column`.
///
/// Fails with [`ErrorKind::InvalidRange`] when both bounds are typed and `start` is after
/// `end`. Pre-formatted bounds are passed through to the warehouse unchecked.
pub fn build_range_query(
    table: &TableRef,
    start: impl Into<RangeBound>,
    end: impl Into<RangeBound>,
    date_column: &str,
) -> SyncResult<RangeQuery> {
    let start = start.into();
    let end = end.into();

    if let (Some(start_instant), Some(end_instant)) = (start.as_instant(), end.as_instant())
        && start_instant > end_instant
    {
        bail!(
            ErrorKind::InvalidRange,
            "Range start is after range end",
            format!("{start} > {end}")
        );
    }

    let full_table_name = table.full_table_name()?;
    let quoted_date_column = quote_identifier(date_column, "date column")?;

    let sql = format!(
        "SELECT * FROM {full_table_name} WHERE {quoted_date_column} BETWEEN {} AND {} ORDER BY {quoted_date_column} ASC",
        start.to_literal(),
        end.to_literal()
    );

    Ok(RangeQuery {
        table: table.clone(),
        date_column: date_column.to_owned(),
        start,
        end,
        sql,
    })
}
