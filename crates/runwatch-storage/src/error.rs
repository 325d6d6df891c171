/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use runwatch_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "alert_definition",
///     id: "def-99".to_string(),
/// };
/// assert!(err.to_string().contains("alert_definition"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the database.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored document could not be encoded or decoded.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A column held a value that does not parse into its domain type.
    #[error("Storage: invalid value in column '{column}': {detail}")]
    InvalidColumn {
        column: &'static str,
        detail: String,
    },

    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
