//! Reconciliation binary.
//!
//! Reads a JSON batch of rows, fetches the rows already stored in the configured table for a
//! date range and reconciles the batch against them: unchanged rows are skipped, changed rows
//! are updated in place and new rows are appended with a streaming insert.

use std::path::PathBuf;

use clap::Parser;
use sync_config::shared::SyncConfig;
use sync_telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::load_sync_config;
use crate::core::start_sync_with_config;

mod config;
mod core;

#[derive(Debug, Parser)]
#[command(name = "syncer", version, about, arg_required_else_help = true)]
struct SyncArgs {
    /// Path to a JSON array of row objects to reconcile
    #[arg(long)]
    rows: PathBuf,

    /// Start of the fetched range, a timestamp or `YYYY-MM-DD` date (inclusive)
    #[arg(long)]
    start: String,

    /// End of the fetched range, a timestamp or `YYYY-MM-DD` date (inclusive)
    #[arg(long)]
    end: String,
}

fn main() -> anyhow::Result<()> {
    let args = SyncArgs::parse();

    let sync_config = load_sync_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    // We start the runtime.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(sync_config, args))?;

    Ok(())
}

/// Runs one reconciliation and logs the error that ended it, if any.
async fn async_main(sync_config: SyncConfig, args: SyncArgs) -> anyhow::Result<()> {
    if let Err(err) =
        start_sync_with_config(sync_config, &args.rows, &args.start, &args.end).await
    {
        error!("{err:#}");
        return Err(err);
    }

    Ok(())
}
