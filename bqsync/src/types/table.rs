use std::fmt;

use crate::error::SyncResult;
use crate::format::sanitize_identifier;

/// Identity of a warehouse table: the (project, dataset, table) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }

    /// Returns the fully qualified table name used in statement text.
    ///
    /// Formats the name as `` `project_id.dataset_id.table_id` `` with each part sanitized.
    pub fn full_table_name(&self) -> SyncResult<String> {
        let project_id = sanitize_identifier(&self.project_id, "project id")?;
        let dataset_id = sanitize_identifier(&self.dataset_id, "dataset id")?;
        let table_id = sanitize_identifier(&self.table_id, "table id")?;

        Ok(format!("`{project_id}.{dataset_id}.{table_id}`"))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_full_table_name_formatting() {
        let table = TableRef::new("test-project", "test_dataset", "test_table");

        assert_eq!(
            table.full_table_name().unwrap(),
            "`test-project.test_dataset.test_table`"
        );
        assert_eq!(table.to_string(), "test-project.test_dataset.test_table");
    }

    #[test]
    fn test_full_table_name_rejects_empty_parts() {
        let table = TableRef::new("project", "", "table");

        let err = table.full_table_name().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIdentifier);
    }
}
