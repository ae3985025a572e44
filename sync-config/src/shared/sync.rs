use serde::Deserialize;

use crate::shared::base::require_non_empty;
use crate::shared::{ValidationError, WarehouseConfig};

/// Fully qualified table to reconcile and the column its range queries filter on.
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
    /// Timestamp or date column bounding the fetched range.
    pub date_column: String,
}

impl TableConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("table.project_id", &self.project_id)?;
        require_non_empty("table.dataset_id", &self.dataset_id)?;
        require_non_empty("table.table_id", &self.table_id)?;
        require_non_empty("table.date_column", &self.date_column)
    }
}

/// Configuration of a reconciliation run.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub table: TableConfig,
    /// Column identifying a row across batches.
    pub key_column: String,
    /// Column holding a content hash. Without it every matched row is updated.
    #[serde(default)]
    pub checksum_column: Option<String>,
    pub warehouse: WarehouseConfig,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.table.validate()?;
        require_non_empty("key_column", &self.key_column)?;

        if let Some(checksum_column) = &self.checksum_column {
            require_non_empty("checksum_column", checksum_column)?;
            if checksum_column == &self.key_column {
                return Err(ValidationError::ChecksumIsKey(checksum_column.clone()));
            }
        }

        self.warehouse.validate()
    }
}
