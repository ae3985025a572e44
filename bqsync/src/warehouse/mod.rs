mod base;
pub mod bigquery;
pub mod memory;

pub use base::{InsertRowError, Warehouse};
