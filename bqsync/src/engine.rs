use tracing::{debug, error, info, warn};

use crate::classify::{classify, validate_incoming};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::mutation::{MutationStatement, build_update};
use crate::query::{RangeBound, build_range_query};
use crate::sync_error;
use crate::types::{Row, TableRef, Value};
use crate::warehouse::Warehouse;

/// An update that the warehouse failed to apply.
#[derive(Debug, Clone)]
pub struct UpdateFailure {
    /// Key of the row whose update failed.
    pub key: Value,
    pub error: SyncError,
}

/// An incoming row that the streaming insert did not store.
#[derive(Debug, Clone)]
pub struct InsertFailure {
    /// Position of the row within the insert partition.
    pub index: usize,
    pub row: Row,
    pub error: SyncError,
}

/// Outcome of the insert phase of a sync.
#[derive(Debug, Clone, Default)]
pub struct InsertReport {
    pub attempted: usize,
    pub accepted: usize,
    pub failures: Vec<InsertFailure>,
}

/// Outcome of a sync.
///
/// Fatal errors never end up in a report, they abort the sync instead.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Number of incoming rows that matched an unchanged existing row.
    pub ignored: usize,
    /// Number of updates applied successfully.
    pub updated: usize,
    pub update_failures: Vec<UpdateFailure>,
    pub inserted: InsertReport,
}

impl SyncReport {
    /// Returns `true` when every update and insert succeeded.
    pub fn is_complete(&self) -> bool {
        self.update_failures.is_empty() && self.inserted.failures.is_empty()
    }

    /// Returns the total number of rows that could not be written.
    pub fn failed(&self) -> usize {
        self.update_failures.len() + self.inserted.failures.len()
    }
}

/// Builds the error returned when a fatal error aborts a sync.
///
/// The partial report is dropped on abort, so update failures recorded before `err` are
/// aggregated after it. `err` stays first and determines [`SyncError::kind`].
fn abort_error(err: SyncError, report: &SyncReport) -> SyncError {
    if report.update_failures.is_empty() {
        return err;
    }

    let mut errors = Vec::with_capacity(report.update_failures.len() + 1);
    errors.push(err);
    errors.extend(
        report
            .update_failures
            .iter()
            .map(|failure| failure.error.clone()),
    );

    SyncError::from(errors)
}

/// Reconciles incoming batches against a single warehouse table.
///
/// A sync runs in three phases, one operation at a time:
///
/// 1. the incoming batch is classified against the existing rows and an update statement is
///    built for every changed row, so that validation errors surface before the warehouse is
///    touched;
/// 2. the updates are executed in classification order, a failed update is recorded in the
///    report and the next one is attempted;
/// 3. all new rows are appended with a single streaming insert.
///
/// Errors of a fatal kind ([`ErrorKind::ServiceConnectivity`], [`ErrorKind::AuthenticationError`])
/// abort the sync immediately, aggregated with the update failures recorded so far. Phases are
/// not atomic: re-running a sync after a partial failure converges because unchanged rows are
/// recognized by their checksum.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine<W> {
    warehouse: W,
    table: TableRef,
}

impl<W> ReconciliationEngine<W>
where
    W: Warehouse,
{
    pub fn new(warehouse: W, table: TableRef) -> Self {
        Self { warehouse, table }
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Fetches the rows of the table with `date_column` in `[start, end]`, ascending by date.
    pub async fn fetch(
        &self,
        start: impl Into<RangeBound>,
        end: impl Into<RangeBound>,
        date_column: &str,
    ) -> SyncResult<Vec<Row>> {
        let query = build_range_query(&self.table, start, end, date_column)?;

        info!(
            warehouse = W::name(),
            table = %self.table,
            sql = query.sql(),
            "fetching existing rows"
        );

        let rows = self.warehouse.execute_query(&query).await?;

        info!(table = %self.table, rows = rows.len(), "fetched existing rows");

        Ok(rows)
    }

    /// Reconciles `incoming` against the `existing` rows of the table.
    ///
    /// Rows are matched on `key_column`. When `checksum_column` is given, matched rows with an
    /// equal checksum are left untouched, otherwise every matched row is updated.
    pub async fn sync(
        &self,
        existing: &[Row],
        incoming: Vec<Row>,
        key_column: &str,
        checksum_column: Option<&str>,
    ) -> SyncResult<SyncReport> {
        let incoming_rows = incoming.len();
        let classification = classify(existing, incoming, key_column, checksum_column)?;

        let statements = classification
            .update
            .iter()
            .map(|row| build_update(&self.table, row, key_column))
            .collect::<SyncResult<Vec<_>>>()?;

        info!(
            warehouse = W::name(),
            table = %self.table,
            existing = existing.len(),
            incoming = incoming_rows,
            ignore = classification.ignore.len(),
            update = classification.update.len(),
            insert = classification.insert.len(),
            "starting sync"
        );

        let mut report = SyncReport {
            ignored: classification.ignore.len(),
            ..SyncReport::default()
        };

        self.apply_updates(statements, &mut report)
            .await
            .map_err(|err| abort_error(err, &report))?;
        report.inserted = self
            .insert_rows(classification.insert)
            .await
            .map_err(|err| abort_error(err, &report))?;

        info!(
            table = %self.table,
            ignored = report.ignored,
            updated = report.updated,
            update_failures = report.update_failures.len(),
            inserted = report.inserted.accepted,
            insert_failures = report.inserted.failures.len(),
            "sync finished"
        );

        Ok(report)
    }

    /// Fetches the existing rows for `[start, end]` and reconciles `incoming` against them.
    ///
    /// Incoming rows without `key_column` fail the call before the range is fetched.
    pub async fn fetch_and_sync(
        &self,
        start: impl Into<RangeBound>,
        end: impl Into<RangeBound>,
        date_column: &str,
        incoming: Vec<Row>,
        key_column: &str,
        checksum_column: Option<&str>,
    ) -> SyncResult<SyncReport> {
        validate_incoming(&incoming, key_column)?;

        let existing = self.fetch(start, end, date_column).await?;

        self.sync(&existing, incoming, key_column, checksum_column)
            .await
    }

    async fn apply_updates(
        &self,
        statements: Vec<MutationStatement>,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        for statement in statements {
            info!(table = %self.table, sql = statement.sql(), "executing update");

            match self.warehouse.execute_mutation(&statement).await {
                Ok(()) => report.updated += 1,
                Err(err) if err.is_fatal() => {
                    error!(
                        table = %self.table,
                        key = %statement.key(),
                        error = %err,
                        "fatal error while updating, aborting sync"
                    );
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        table = %self.table,
                        key = %statement.key(),
                        error = %err,
                        "update failed, continuing with the next row"
                    );
                    report.update_failures.push(UpdateFailure {
                        key: statement.key().clone(),
                        error: err,
                    });
                }
            }
        }

        Ok(())
    }

    async fn insert_rows(&self, rows: Vec<Row>) -> SyncResult<InsertReport> {
        if rows.is_empty() {
            debug!(table = %self.table, "no rows to insert");
            return Ok(InsertReport::default());
        }

        info!(table = %self.table, rows = rows.len(), "streaming new rows");

        let attempted = rows.len();
        let row_errors = match self.warehouse.stream_insert(&self.table, &rows).await {
            Ok(row_errors) => row_errors,
            Err(err) if err.is_fatal() => {
                error!(table = %self.table, error = %err, "fatal error while inserting");
                return Err(err);
            }
            Err(err) => {
                warn!(
                    table = %self.table,
                    rows = attempted,
                    error = %err,
                    "streaming insert failed for the whole batch"
                );
                let failures = rows
                    .into_iter()
                    .enumerate()
                    .map(|(index, row)| InsertFailure {
                        index,
                        row,
                        error: err.clone(),
                    })
                    .collect();

                return Ok(InsertReport {
                    attempted,
                    accepted: 0,
                    failures,
                });
            }
        };

        let mut slots: Vec<Option<Row>> = rows.into_iter().map(Some).collect();
        let mut failures = Vec::with_capacity(row_errors.len());
        for row_error in row_errors {
            let Some(row) = slots.get_mut(row_error.index).and_then(Option::take) else {
                warn!(
                    table = %self.table,
                    index = row_error.index,
                    "warehouse reported an error for an unknown or repeated row index"
                );
                continue;
            };

            warn!(
                table = %self.table,
                index = row_error.index,
                errors = %row_error,
                "row rejected by streaming insert"
            );
            failures.push(InsertFailure {
                index: row_error.index,
                row,
                error: sync_error!(
                    ErrorKind::StreamInsertPartialFailure,
                    "Row rejected by streaming insert",
                    row_error.messages.join("; ")
                ),
            });
        }

        Ok(InsertReport {
            attempted,
            accepted: attempted - failures.len(),
            failures,
        })
    }
}
