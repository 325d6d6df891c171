use std::fmt;

/// Whether a failed send could succeed if tried again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchErrorKind {
    Transient,
    Permanent,
}

impl fmt::Display for DispatchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        })
    }
}

/// A failed notification send. Never retried by the poller; recorded in
/// history as the failure detail.
///
/// # Examples
///
/// ```rust
/// use runwatch_notify::error::DispatchError;
///
/// let err = DispatchError::permanent("token unregistered");
/// assert_eq!(err.to_string(), "permanent: token unregistered");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct DispatchError {
    pub kind: DispatchErrorKind,
    pub detail: String,
}

impl DispatchError {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self {
            kind: DispatchErrorKind::Transient,
            detail: detail.into(),
        }
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self {
            kind: DispatchErrorKind::Permanent,
            detail: detail.into(),
        }
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() || e.is_redirect() {
            Self::permanent(e.to_string())
        } else {
            Self::transient(e.to_string())
        }
    }
}

/// Errors building dispatchers from configuration.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Dispatcher configuration is missing a required field or contains an invalid value.
    #[error("Notify: invalid dispatcher configuration: {0}")]
    InvalidConfig(String),

    /// The dispatcher kind is not registered in the plugin registry.
    #[error("Notify: unknown dispatcher kind '{0}'")]
    UnknownDispatcher(String),
}

/// Convenience `Result` alias for dispatcher construction.
pub type Result<T> = std::result::Result<T, NotifyError>;
