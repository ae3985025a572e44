use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is empty or contains only whitespace.
    #[error("`{0}` cannot be empty")]
    EmptyField(&'static str),
    /// The checksum column names the key column.
    #[error("`checksum_column` must differ from `key_column`, both are `{0}`")]
    ChecksumIsKey(String),
    /// More than one credential source is set for BigQuery.
    #[error("Invalid BigQuery config: set at most one of `service_account_key_path` and `service_account_key`")]
    ConflictingCredentials,
}

/// Returns [`ValidationError::EmptyField`] when `value` is blank.
pub(crate) fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field));
    }

    Ok(())
}
