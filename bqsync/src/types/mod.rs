//! Common types used throughout the reconciliation engine.
//!
//! Includes the typed [`Value`] scalar, the ordered [`Row`] mapping and the [`TableRef`]
//! identity of a warehouse table.

mod row;
mod table;
mod value;

pub use row::*;
pub use table::*;
pub use value::*;
