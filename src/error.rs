use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Command type not registered: {0}")]
    UnknownTypeTag(String),

    #[error("Command type registered twice: {0}")]
    DuplicateTypeTag(String),

    #[error("No processor named '{0}' in this group")]
    UnknownProcessor(String),

    #[error("Processor defined twice: {0}")]
    DuplicateProcessor(String),

    #[error("Descriptor not found: {0}")]
    DescriptorNotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Store I/O failure: {0}")]
    StoreFailure(String),

    #[error("Processors did not stop within the shutdown grace period and were aborted: {processors:?}")]
    ShutdownTimeout { processors: Vec<String> },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Command execution verdict - determines retry behavior
#[derive(Error, Debug, Clone)]
pub enum CommandError {
    /// Retryable failure - the descriptor is reinserted at the tail of its priority band
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Permanent failure - the descriptor is removed, no retry
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl CommandError {
    /// Create a retryable error
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    /// Create a permanent error
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreFailure(err.to_string())
    }
}
