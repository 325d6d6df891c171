use runwatch_storage::StorageError;

/// Errors surfaced by alert definition and materialization operations.
///
/// `Validation` and `Precondition` are caller mistakes and are reported
/// synchronously; `Persistence` is operational.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, AlertError>;
