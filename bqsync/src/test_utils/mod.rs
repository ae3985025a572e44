//! Testing utilities for reconciliation scenarios.
//!
//! [`test_warehouse_wrapper`] records the operations reaching a warehouse and injects
//! failures, [`rows`] builds the rows used throughout the tests.

pub mod rows;
pub mod test_warehouse_wrapper;
