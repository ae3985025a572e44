//! Configuration types shared by the reconciliation binaries.

mod base;
mod sync;
mod warehouse;

pub use base::ValidationError;
pub use sync::{SyncConfig, TableConfig};
pub use warehouse::WarehouseConfig;
