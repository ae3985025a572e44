use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{ErrorKind, SyncResult};
use crate::mutation::MutationStatement;
use crate::query::RangeQuery;
use crate::sync_error;
use crate::types::{Row, TableRef, Value};
use crate::warehouse::{InsertRowError, Warehouse};

struct Inner<W> {
    wrapped_warehouse: W,
    queries: Vec<RangeQuery>,
    mutations: Vec<MutationStatement>,
    insert_batches: Vec<Vec<Row>>,
    query_failure: Option<ErrorKind>,
    mutation_failures: Vec<(Value, ErrorKind)>,
    insert_failure: Option<ErrorKind>,
    insert_rejections: Vec<(usize, String)>,
}

/// Test wrapper for [`Warehouse`] implementations that tracks all operations.
///
/// [`TestWarehouseWrapper`] wraps any warehouse and records every query, mutation and insert
/// batch flowing through it. Failures can be injected per operation so that the error
/// propagation of the engine can be asserted without a real warehouse:
///
/// - [`TestWarehouseWrapper::fail_queries`] fails every range query;
/// - [`TestWarehouseWrapper::fail_mutation_for_key`] fails the mutations targeting a key;
/// - [`TestWarehouseWrapper::fail_inserts`] fails whole insert requests;
/// - [`TestWarehouseWrapper::reject_insert_row`] rejects single rows of insert batches.
///
/// Operations are recorded when they reach the wrapper, whether they succeed or not. Rejected
/// insert rows are not forwarded to the wrapped warehouse.
#[derive(Clone)]
pub struct TestWarehouseWrapper<W> {
    inner: Arc<RwLock<Inner<W>>>,
}

impl<W: fmt::Debug> fmt::Debug for TestWarehouseWrapper<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Ok(inner) = self.inner.try_read() else {
            return f.debug_struct("TestWarehouseWrapper").finish_non_exhaustive();
        };
        f.debug_struct("TestWarehouseWrapper")
            .field("wrapped_warehouse", &inner.wrapped_warehouse)
            .field("queries", &inner.queries)
            .field("mutations", &inner.mutations)
            .field("insert_batches", &inner.insert_batches)
            .finish()
    }
}

impl<W> TestWarehouseWrapper<W> {
    /// Creates a new test wrapper around any warehouse implementation.
    pub fn wrap(warehouse: W) -> Self {
        let inner = Inner {
            wrapped_warehouse: warehouse,
            queries: Vec::new(),
            mutations: Vec::new(),
            insert_batches: Vec::new(),
            query_failure: None,
            mutation_failures: Vec::new(),
            insert_failure: None,
            insert_rejections: Vec::new(),
        };

        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Fails every following range query with an error of `kind`.
    pub async fn fail_queries(&self, kind: ErrorKind) {
        self.inner.write().await.query_failure = Some(kind);
    }

    /// Fails every following mutation whose key equals `key` with an error of `kind`.
    pub async fn fail_mutation_for_key(&self, key: impl Into<Value>, kind: ErrorKind) {
        let mut inner = self.inner.write().await;
        inner.mutation_failures.push((key.into(), kind));
    }

    /// Fails every following insert request as a whole with an error of `kind`.
    pub async fn fail_inserts(&self, kind: ErrorKind) {
        self.inner.write().await.insert_failure = Some(kind);
    }

    /// Rejects the row at `index` of every following insert batch with `message`.
    pub async fn reject_insert_row(&self, index: usize, message: impl Into<String>) {
        let mut inner = self.inner.write().await;
        inner.insert_rejections.push((index, message.into()));
    }

    /// Removes all injected failures.
    pub async fn clear_failures(&self) {
        let mut inner = self.inner.write().await;
        inner.query_failure = None;
        inner.mutation_failures.clear();
        inner.insert_failure = None;
        inner.insert_rejections.clear();
    }

    /// Returns all range queries that reached the wrapper.
    pub async fn queries(&self) -> Vec<RangeQuery> {
        self.inner.read().await.queries.clone()
    }

    /// Returns all mutations that reached the wrapper, in execution order.
    pub async fn mutations(&self) -> Vec<MutationStatement> {
        self.inner.read().await.mutations.clone()
    }

    /// Returns every insert batch that reached the wrapper, rejected rows included.
    pub async fn insert_batches(&self) -> Vec<Vec<Row>> {
        self.inner.read().await.insert_batches.clone()
    }

    /// Returns the total number of operations that reached the wrapper.
    pub async fn calls(&self) -> usize {
        let inner = self.inner.read().await;
        inner.queries.len() + inner.mutations.len() + inner.insert_batches.len()
    }
}

impl<W: Clone> TestWarehouseWrapper<W> {
    /// Returns a handle to the wrapped warehouse.
    pub async fn wrapped_warehouse(&self) -> W {
        self.inner.read().await.wrapped_warehouse.clone()
    }
}

impl<W> Warehouse for TestWarehouseWrapper<W>
where
    W: Warehouse + Send + Sync + Clone,
{
    fn name() -> &'static str {
        "wrapper"
    }

    async fn execute_query(&self, query: &RangeQuery) -> SyncResult<Vec<Row>> {
        let (warehouse, failure) = {
            let mut inner = self.inner.write().await;
            inner.queries.push(query.clone());
            (inner.wrapped_warehouse.clone(), inner.query_failure)
        };

        if let Some(kind) = failure {
            return Err(sync_error!(kind, "Injected query failure", query.table()));
        }

        warehouse.execute_query(query).await
    }

    async fn execute_mutation(&self, statement: &MutationStatement) -> SyncResult<()> {
        let (warehouse, failure) = {
            let mut inner = self.inner.write().await;
            inner.mutations.push(statement.clone());
            let failure = inner
                .mutation_failures
                .iter()
                .find(|(key, _)| key == statement.key())
                .map(|(_, kind)| *kind);
            (inner.wrapped_warehouse.clone(), failure)
        };

        if let Some(kind) = failure {
            return Err(sync_error!(
                kind,
                "Injected mutation failure",
                statement.key()
            ));
        }

        warehouse.execute_mutation(statement).await
    }

    async fn stream_insert(
        &self,
        table: &TableRef,
        rows: &[Row],
    ) -> SyncResult<Vec<InsertRowError>> {
        let (warehouse, failure, rejections) = {
            let mut inner = self.inner.write().await;
            inner.insert_batches.push(rows.to_vec());
            (
                inner.wrapped_warehouse.clone(),
                inner.insert_failure,
                inner.insert_rejections.clone(),
            )
        };

        if let Some(kind) = failure {
            return Err(sync_error!(kind, "Injected insert failure", table));
        }

        let mut row_errors: Vec<InsertRowError> = Vec::new();
        for (index, message) in rejections {
            if index >= rows.len() {
                continue;
            }
            match row_errors.iter_mut().find(|error| error.index == index) {
                Some(error) => error.messages.push(message),
                None => row_errors.push(InsertRowError::new(index, vec![message])),
            }
        }
        row_errors.sort_by_key(|error| error.index);

        let accepted: Vec<Row> = rows
            .iter()
            .enumerate()
            .filter(|(index, _)| !row_errors.iter().any(|error| error.index == *index))
            .map(|(_, row)| row.clone())
            .collect();

        let mut forwarded_errors = if accepted.is_empty() {
            Vec::new()
        } else {
            warehouse.stream_insert(table, &accepted).await?
        };
        // Indices reported by the wrapped warehouse refer to the accepted subset.
        let accepted_indices: Vec<usize> = (0..rows.len())
            .filter(|index| !row_errors.iter().any(|error| error.index == *index))
            .collect();
        for error in &mut forwarded_errors {
            if let Some(original) = accepted_indices.get(error.index) {
                error.index = *original;
            }
        }

        row_errors.extend(forwarded_errors);
        row_errors.sort_by_key(|error| error.index);

        Ok(row_errors)
    }
}
