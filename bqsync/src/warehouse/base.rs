use std::fmt;
use std::future::Future;

use crate::error::SyncResult;
use crate::mutation::MutationStatement;
use crate::query::RangeQuery;
use crate::types::{Row, TableRef};

/// A row rejected by a streaming insert.
///
/// `index` is the position of the row in the batch handed to [`Warehouse::stream_insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRowError {
    pub index: usize,
    pub messages: Vec<String>,
}

impl InsertRowError {
    pub fn new(index: usize, messages: Vec<String>) -> Self {
        Self { index, messages }
    }
}

impl fmt::Display for InsertRowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.index, self.messages.join("; "))
    }
}

/// Trait for warehouses holding the tables that are reconciled.
///
/// A [`Warehouse`] executes the three kinds of operations a sync needs: a range query
/// returning the rows currently stored, point mutations updating a single row by key and a
/// streaming insert appending new rows.
///
/// Errors are classified through [`crate::error::ErrorKind`]. Implementations must report
/// connectivity and authentication problems with [`crate::error::ErrorKind::ServiceConnectivity`]
/// and [`crate::error::ErrorKind::AuthenticationError`] since the engine aborts a sync on them
/// and records any other failure per row.
pub trait Warehouse {
    /// Returns the name of the warehouse.
    fn name() -> &'static str;

    /// Executes a range query and returns the matching rows in the order of the query.
    fn execute_query(
        &self,
        query: &RangeQuery,
    ) -> impl Future<Output = SyncResult<Vec<Row>>> + Send;

    /// Executes a single point mutation.
    ///
    /// Each call is independent, a failure must not affect mutations issued before or after.
    fn execute_mutation(
        &self,
        statement: &MutationStatement,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Appends `rows` to `table` through the streaming insert path.
    ///
    /// Returns the rows rejected by the warehouse. An `Ok` with an empty vector means every
    /// row was accepted. A whole-request failure is returned as an error instead.
    fn stream_insert(
        &self,
        table: &TableRef,
        rows: &[Row],
    ) -> impl Future<Output = SyncResult<Vec<InsertRowError>>> + Send;
}
