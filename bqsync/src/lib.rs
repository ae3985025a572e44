//! Reconciliation of locally computed row batches against a BigQuery table.
//!
//! Given the rows already stored in a table and a new batch, the crate decides for every
//! incoming row whether it is unchanged, must update the matching stored row or must be
//! inserted, and applies that decision to a [`warehouse::Warehouse`]:
//!
//! - [`classify`] partitions the incoming batch by key and optional checksum;
//! - [`mutation`] renders point updates and [`query`] renders range fetches, using the
//!   literal rules of [`format`];
//! - [`engine`] orchestrates fetch, updates and streaming insert and reports the outcome.
//!
//! The BigQuery warehouse is available behind the `bigquery` feature, the in-memory
//! warehouse is always available.

mod macros;

pub mod classify;
pub mod engine;
pub mod error;
pub mod format;
pub mod mutation;
pub mod query;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod warehouse;
