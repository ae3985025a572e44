use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::mutation::MutationStatement;
use crate::query::{RangeBound, RangeQuery, parse_instant};
use crate::types::{Row, TableRef, Value};
use crate::warehouse::{InsertRowError, Warehouse};

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<TableRef, Vec<Row>>,
    executed_sql: Vec<String>,
}

/// In-memory warehouse for testing and development purposes.
///
/// [`MemoryWarehouse`] keeps every table as a vector of rows and applies the structured form
/// of range queries and mutations instead of parsing their statement text. The statement text
/// of every executed query and mutation is recorded and can be inspected afterwards.
///
/// Tables that were never written to behave as empty tables.
///
/// Range queries keep the rows whose date column holds a timestamp, a date or a string
/// parseable as an instant within the inclusive bounds, and return them sorted ascending by
/// that instant. Streaming inserts always accept every row.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryWarehouse {
    /// Creates a new empty memory warehouse.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `rows` to `table`, creating the table when it does not exist yet.
    pub async fn insert_rows(&self, table: &TableRef, rows: Vec<Row>) {
        let mut inner = self.inner.lock().await;
        inner.tables.entry(table.clone()).or_default().extend(rows);
    }

    /// Returns a copy of the rows stored in `table`, in storage order.
    pub async fn rows(&self, table: &TableRef) -> Vec<Row> {
        let inner = self.inner.lock().await;
        inner.tables.get(table).cloned().unwrap_or_default()
    }

    /// Returns the statement text of every executed query and mutation, in execution order.
    pub async fn executed_sql(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.executed_sql.clone()
    }

    /// Clears all tables and recorded statements.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.tables.clear();
        inner.executed_sql.clear();
    }
}

/// Resolves a range bound to an instant, parsing pre-formatted strings.
fn bound_instant(bound: &RangeBound) -> SyncResult<DateTime<Utc>> {
    match bound.as_instant() {
        Some(instant) => Ok(instant),
        None => match bound {
            RangeBound::Instant(instant) => parse_instant(instant),
            _ => bail!(
                ErrorKind::InvalidRange,
                "Range bound is not representable as an instant",
                bound
            ),
        },
    }
}

/// Returns the instant held by a date column value, if it denotes one.
fn value_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(value) => parse_instant(value).ok(),
        value => value.as_instant(),
    }
}

fn key_matches(row: &Row, key_column: &str, key: &Value) -> bool {
    match (row.get(key_column), key) {
        (None | Some(Value::Null), Value::Null) => true,
        (Some(value), key) => value == key,
        (None, _) => false,
    }
}

impl Warehouse for MemoryWarehouse {
    fn name() -> &'static str {
        "memory"
    }

    async fn execute_query(&self, query: &RangeQuery) -> SyncResult<Vec<Row>> {
        let start = bound_instant(query.start())?;
        let end = bound_instant(query.end())?;

        let mut inner = self.inner.lock().await;
        inner.executed_sql.push(query.sql().to_owned());

        let mut selected: Vec<(DateTime<Utc>, Row)> = inner
            .tables
            .get(query.table())
            .into_iter()
            .flatten()
            .filter_map(|row| {
                let instant = row.get(query.date_column()).and_then(value_instant)?;
                (start <= instant && instant <= end).then(|| (instant, row.clone()))
            })
            .collect();
        selected.sort_by_key(|(instant, _)| *instant);

        info!(
            table = %query.table(),
            rows = selected.len(),
            "executed range query on memory warehouse"
        );

        Ok(selected.into_iter().map(|(_, row)| row).collect())
    }

    async fn execute_mutation(&self, statement: &MutationStatement) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.executed_sql.push(statement.sql().to_owned());

        let mut affected = 0;
        for row in inner
            .tables
            .get_mut(statement.table())
            .into_iter()
            .flatten()
            .filter(|row| key_matches(row, statement.key_column(), statement.key()))
        {
            for (column, value) in statement.assignments().columns() {
                row.set(column, value.clone());
            }
            affected += 1;
        }

        debug!(
            table = %statement.table(),
            key = %statement.key(),
            affected,
            "applied mutation on memory warehouse"
        );

        Ok(())
    }

    async fn stream_insert(
        &self,
        table: &TableRef,
        rows: &[Row],
    ) -> SyncResult<Vec<InsertRowError>> {
        let mut inner = self.inner.lock().await;

        info!(%table, rows = rows.len(), "streaming rows into memory warehouse");

        inner
            .tables
            .entry(table.clone())
            .or_default()
            .extend(rows.iter().cloned());

        Ok(Vec::new())
    }
}
