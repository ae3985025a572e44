//! Tracing subscriber setup.
//!
//! Binaries call [`init_tracing`] once at startup and keep the returned [`LogFlusher`] alive
//! until exit. Tests call [`init_test_tracing`], which only installs a subscriber when the
//! `ENABLE_TRACING` environment variable is set.

use std::io;
use std::sync::Once;
use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

/// Environment variable selecting the runtime environment (`dev` or `prod`).
const APP_ENVIRONMENT_ENV_NAME: &str = "APP_ENVIRONMENT";

/// Environment variable enabling log output in tests.
const ENABLE_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

static INIT_TEST_TRACING: Once = Once::new();

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to redirect `log` records to tracing: {0}")]
    LogTracer(#[from] tracing_log::log::SetLoggerError),

    #[error("failed to set the global tracing subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),
}

/// Flushes buffered log lines when dropped.
///
/// Log lines are written by a background worker. Dropping the flusher waits for the worker
/// to drain its buffer, so it must live until the end of `main`.
#[must_use = "dropping the flusher stops log output"]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

/// Returns `true` when running in the `prod` environment.
fn is_prod() -> bool {
    std::env::var(APP_ENVIRONMENT_ENV_NAME)
        .map(|environment| environment.eq_ignore_ascii_case("prod"))
        .unwrap_or(false)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global tracing subscriber for the binary named `app_name`.
///
/// Logs go to stdout through a non-blocking writer, as JSON in `prod` and as human-readable
/// lines otherwise. Records emitted through the `log` crate are forwarded to tracing.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    LogTracer::init()?;

    let (writer, guard) = tracing_appender::non_blocking(io::stdout());

    if is_prod() {
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_env_filter(env_filter())
            .with_writer(writer)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(writer)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    tracing::info!(app_name, prod = is_prod(), "tracing initialized");

    Ok(LogFlusher { _guard: guard })
}

/// Installs a test subscriber writing through the test harness capture, at most once.
///
/// Does nothing unless `ENABLE_TRACING` is set, so test output stays quiet by default.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var(ENABLE_TRACING_ENV_NAME).is_err() {
            return;
        }

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_test_writer()
            .finish();
        // Another test harness may have installed a subscriber already.
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_test_tracing_is_idempotent() {
        init_test_tracing();
        init_test_tracing();
    }
}
