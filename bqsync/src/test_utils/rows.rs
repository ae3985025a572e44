use chrono::{DateTime, TimeZone, Utc};

use crate::types::{Row, TableRef};

/// Key column of the rows built by [`fact_row`].
pub const KEY_COLUMN: &str = "id";
/// Checksum column of the rows built by [`fact_row`].
pub const CHECKSUM_COLUMN: &str = "checksum";
/// Date column of the rows built by [`fact_row`].
pub const DATE_COLUMN: &str = "date";

/// Returns the table reference used by tests.
pub fn test_table() -> TableRef {
    TableRef::new("test-project", "test_dataset", "facts")
}

/// Returns midnight UTC of the given day of January 2020.
pub fn january(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Builds a row with an integer key, a checksum, a date in January 2020 and a payload column.
pub fn fact_row(id: i64, checksum: &str, day: u32) -> Row {
    Row::new()
        .with_column(KEY_COLUMN, id)
        .with_column(CHECKSUM_COLUMN, checksum)
        .with_column(DATE_COLUMN, january(day))
        .with_column("payload", format!("payload-{id}-{checksum}"))
}
