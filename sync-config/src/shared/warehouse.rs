use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Warehouse the reconciliation runs against.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseConfig {
    /// Google BigQuery.
    ///
    /// Credentials are taken from `service_account_key_path`, then `service_account_key`, and
    /// fall back to Application Default Credentials when neither is set.
    BigQuery {
        /// Path to a service account key JSON file.
        #[serde(default)]
        service_account_key_path: Option<String>,
        /// Service account key JSON.
        #[serde(default)]
        service_account_key: Option<SecretString>,
    },
    /// In-process warehouse, for local runs.
    Memory,
}

impl WarehouseConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            WarehouseConfig::BigQuery {
                service_account_key_path: Some(_),
                service_account_key: Some(_),
            } => Err(ValidationError::ConflictingCredentials),
            _ => Ok(()),
        }
    }
}
