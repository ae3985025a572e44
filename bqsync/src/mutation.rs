use std::fmt;

use crate::bail;
use crate::classify::key_of;
use crate::error::{ErrorKind, SyncResult};
use crate::format::{format_literal, quote_identifier};
use crate::types::{Row, TableRef, Value};

/// A point mutation updating the row identified by key equality.
///
/// Carries both the rendered statement text and its structured parts, so warehouses that
/// do not speak SQL can apply it directly.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationStatement {
    table: TableRef,
    key_column: String,
    key: Value,
    assignments: Row,
    sql: String,
}

impl MutationStatement {
    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// Returns the key value the statement filters on.
    pub fn key(&self) -> &Value {
        &self.key
    }

    /// Returns the columns set by the statement, never including the key column.
    pub fn assignments(&self) -> &Row {
        &self.assignments
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl fmt::Display for MutationStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Builds the update statement setting every non-key column of `row` to its value.
///
/// The statement filters on the key column's value and never assigns the key column. Fails
/// with [`ErrorKind::MissingKeyColumn`] when `row` has no key and [`ErrorKind::EmptyRow`] when
/// it has no other column.
pub fn build_update(table: &TableRef, row: &Row, key_column: &str) -> SyncResult<MutationStatement> {
    let key = key_of(row, key_column, "update")?;
    let assignments = row.without(key_column);
    if assignments.is_empty() {
        bail!(
            ErrorKind::EmptyRow,
            "Row has no columns to update",
            format!("only the key column `{key_column}` is present")
        );
    }

    let set_operations = assignments
        .columns()
        .map(|(column, value)| -> SyncResult<String> {
            Ok(format!(
                "{} = {}",
                quote_identifier(column, "column name")?,
                format_literal(value)?
            ))
        })
        .collect::<SyncResult<Vec<_>>>()?
        .join(", ");

    let quoted_key_column = quote_identifier(key_column, "key column")?;
    let key_predicate = match key {
        Value::Null => format!("{quoted_key_column} IS NULL"),
        key => format!("{quoted_key_column} = {}", format_literal(key)?),
    };

    let sql = format!(
        "UPDATE {} SET {set_operations} WHERE {key_predicate}",
        table.full_table_name()?
    );

    Ok(MutationStatement {
        table: table.clone(),
        key_column: key_column.to_owned(),
        key: key.clone(),
        assignments,
        sql,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn table() -> TableRef {
        TableRef::new("project", "dataset", "facts")
    }

    #[test]
    fn test_build_update_sets_every_non_key_column() {
        let row = Row::new()
            .with_column("id", 2)
            .with_column("sum", "c")
            .with_column("amount", 1.25)
            .with_column("active", true)
            .with_column(
                "at",
                Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            );

        let statement = build_update(&table(), &row, "id").unwrap();

        assert_eq!(
            statement.sql(),
            "UPDATE `project.dataset.facts` SET `sum` = 'c', `amount` = 1.25, `active` = true, \
             `at` = TIMESTAMP('2020-01-01T00:00:00Z') WHERE `id` = 2"
        );
        assert_eq!(statement.key(), &Value::Int64(2));
        assert_eq!(statement.assignments().len(), 4);
    }

    #[test]
    fn test_build_update_never_assigns_key_column() {
        let row = Row::new()
            .with_column("name", "x")
            .with_column("id", "k-1")
            .with_column("sum", "y");

        let statement = build_update(&table(), &row, "id").unwrap();

        assert!(!statement.sql().contains("`id` = 'k-1',"));
        assert!(statement.sql().ends_with("WHERE `id` = 'k-1'"));
        assert!(!statement.assignments().contains("id"));
        let set_clause = statement
            .sql()
            .split(" WHERE ")
            .next()
            .unwrap()
            .to_owned();
        assert!(!set_clause.contains("`id`"));
    }

    #[test]
    fn test_build_update_null_key_uses_is_null() {
        let row = Row::new().with_column("id", Value::Null).with_column("v", 1);

        let statement = build_update(&table(), &row, "id").unwrap();

        assert!(statement.sql().ends_with("WHERE `id` IS NULL"));
    }

    #[test]
    fn test_build_update_key_only_row_fails() {
        let row = Row::new().with_column("id", 1);

        let err = build_update(&table(), &row, "id").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EmptyRow);
        assert!(err.is_validation());
    }

    #[test]
    fn test_build_update_missing_key_fails() {
        let row = Row::new().with_column("v", 1);

        let err = build_update(&table(), &row, "id").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MissingKeyColumn);
    }

    #[test]
    fn test_build_update_unsupported_value_fails() {
        let row = Row::new()
            .with_column("id", 1)
            .with_column("payload", vec![0u8, 1, 2]);

        let err = build_update(&table(), &row, "id").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnsupportedValueType);
    }
}
