/// Errors that can occur when asking an instance-state source.
///
/// # Examples
///
/// ```rust
/// use runwatch_cloud::error::OracleError;
///
/// let err = OracleError::UnsupportedOracle("carrier-pigeon".to_string());
/// assert!(err.to_string().contains("carrier-pigeon"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// Non-2xx status code from the state endpoint.
    #[error("{oracle} HTTP error: status={status}, body={body}")]
    HttpError {
        oracle: String,
        status: u16,
        body: String,
    },

    /// An underlying HTTP transport error from `reqwest`.
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Reading tracked instances from the local store failed.
    #[error("Storage error: {0}")]
    StorageError(#[from] runwatch_storage::StorageError),

    /// The configured oracle kind is not known.
    #[error("Unsupported instance state oracle: {0}")]
    UnsupportedOracle(String),

    /// Oracle configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Convenience type alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, OracleError>;
