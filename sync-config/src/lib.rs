//! Configuration loading for the reconciliation tools.
//!
//! [`load_config`] merges `configuration/base.*`, the file of the current [`Environment`]
//! and `APP_`-prefixed environment variables into any deserializable type.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{LoadConfigError, load_config, load_config_from};
