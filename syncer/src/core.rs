use std::fs;
use std::path::Path;
use std::sync::Once;

use anyhow::{Context, bail};
use bqsync::engine::{ReconciliationEngine, SyncReport};
use bqsync::query::parse_instant;
use bqsync::types::{Row, TableRef, Value};
use bqsync::warehouse::Warehouse;
use bqsync::warehouse::bigquery::BigQueryWarehouse;
use bqsync::warehouse::memory::MemoryWarehouse;
use secrecy::ExposeSecret;
use sync_config::shared::{SyncConfig, WarehouseConfig};
use tracing::{info, warn};

static INIT_CRYPTO: Once = Once::new();

/// Installs the AWS LC provider as the process-wide rustls provider.
///
/// Both `ring` and `aws-lc-rs` end up enabled through feature unification, so rustls cannot
/// pick one on its own.
fn install_crypto_provider() {
    INIT_CRYPTO.call_once(|| {
        if rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .is_err()
        {
            warn!("a rustls crypto provider was already installed");
        }
    });
}

/// Runs one reconciliation of the rows in `rows_path` against `[start, end]` of the
/// configured table.
pub async fn start_sync_with_config(
    sync_config: SyncConfig,
    rows_path: &Path,
    start: &str,
    end: &str,
) -> anyhow::Result<()> {
    info!("starting syncer");

    log_config(&sync_config);

    let incoming = read_rows(rows_path, &sync_config.table.date_column)?;
    let table = TableRef::new(
        &sync_config.table.project_id,
        &sync_config.table.dataset_id,
        &sync_config.table.table_id,
    );

    // Each warehouse gets its own engine instance, the engine is statically dispatched.
    let report = match &sync_config.warehouse {
        WarehouseConfig::Memory => {
            let warehouse = MemoryWarehouse::new();
            run_sync(warehouse, table, &sync_config, incoming, start, end).await?
        }
        WarehouseConfig::BigQuery {
            service_account_key_path,
            service_account_key,
        } => {
            install_crypto_provider();

            let project_id = sync_config.table.project_id.clone();
            let warehouse = match (service_account_key_path, service_account_key) {
                (Some(path), _) => BigQueryWarehouse::new_with_key_path(project_id, path).await?,
                (None, Some(key)) => {
                    BigQueryWarehouse::new_with_key(project_id, key.expose_secret()).await?
                }
                (None, None) => BigQueryWarehouse::new_with_adc(project_id).await?,
            };

            run_sync(warehouse, table, &sync_config, incoming, start, end).await?
        }
    };

    if !report.is_complete() {
        bail!(
            "{} of the incoming rows could not be written to the warehouse",
            report.failed()
        );
    }

    info!("syncer completed");

    Ok(())
}

async fn run_sync<W>(
    warehouse: W,
    table: TableRef,
    sync_config: &SyncConfig,
    incoming: Vec<Row>,
    start: &str,
    end: &str,
) -> anyhow::Result<SyncReport>
where
    W: Warehouse,
{
    let engine = ReconciliationEngine::new(warehouse, table);

    let report = engine
        .fetch_and_sync(
            start,
            end,
            &sync_config.table.date_column,
            incoming,
            &sync_config.key_column,
            sync_config.checksum_column.as_deref(),
        )
        .await?;

    log_report(&report);

    Ok(report)
}

/// Reads a JSON array of row objects from `path`.
///
/// String values of `date_column` are kept as strings, GoogleSQL coerces string literals to
/// the column's date or timestamp type. They must still parse as a date or an instant.
fn read_rows(path: &Path, date_column: &str) -> anyhow::Result<Vec<Row>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading rows from `{}`", path.display()))?;
    let rows: Vec<Row> = serde_json::from_str(&contents)
        .with_context(|| format!("parsing rows from `{}`", path.display()))?;

    check_date_values(&rows, date_column)?;

    info!(path = %path.display(), rows = rows.len(), "read incoming rows");

    Ok(rows)
}

fn check_date_values(rows: &[Row], date_column: &str) -> anyhow::Result<()> {
    for (index, row) in rows.iter().enumerate() {
        if let Some(Value::String(raw)) = row.get(date_column) {
            parse_instant(raw)
                .with_context(|| format!("row {index}: invalid `{date_column}` value `{raw}`"))?;
        }
    }

    Ok(())
}

fn log_report(report: &SyncReport) {
    info!(
        ignored = report.ignored,
        updated = report.updated,
        update_failures = report.update_failures.len(),
        inserted = report.inserted.accepted,
        insert_failures = report.inserted.failures.len(),
        "sync report"
    );

    for failure in &report.update_failures {
        warn!(key = %failure.key, error = %failure.error, "row was not updated");
    }

    for failure in &report.inserted.failures {
        warn!(index = failure.index, error = %failure.error, "row was not inserted");
    }
}

fn log_config(config: &SyncConfig) {
    info!(
        project_id = %config.table.project_id,
        dataset_id = %config.table.dataset_id,
        table_id = %config.table.table_id,
        date_column = %config.table.date_column,
        key_column = %config.key_column,
        checksum_column = config.checksum_column.as_deref(),
        "table config"
    );

    match &config.warehouse {
        WarehouseConfig::Memory => info!("using memory warehouse"),
        WarehouseConfig::BigQuery {
            service_account_key_path,
            service_account_key,
        } => {
            let credentials = match (service_account_key_path, service_account_key) {
                (Some(_), _) => "service account key file",
                (None, Some(_)) => "service account key",
                (None, None) => "application default credentials",
            };
            info!(credentials, "using bigquery warehouse");
        }
    }
}
