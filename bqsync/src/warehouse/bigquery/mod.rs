#[cfg(feature = "bigquery")]
mod client;
#[cfg(any(test, feature = "bigquery"))]
mod decoding;

#[cfg(feature = "bigquery")]
pub use client::{BigQueryProjectId, BigQueryWarehouse};
