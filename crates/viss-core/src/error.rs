//! Error types for the vector indexing subsystem.

use thiserror::Error;

/// Result type alias using the subsystem's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for vector indexing and search operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Master switch off, missing credentials, or no vector store configured
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding provider call failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector store call failed
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// Missing or empty input data; resolved locally and never retried
    #[error("Data error: {0}")]
    Data(String),

    /// Relational state disagrees with the vector store
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Queue backend unavailable or rejected an operation
    #[error("Queue error: {0}")]
    Queue(String),

    /// Redis command failed
    #[error("Redis error: {0}")]
    Redis(String),

    /// Operation conflicts with current state (e.g. a task is already running)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Search operation failed
    #[error("Search error: {0}")]
    Search(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a worker should schedule another attempt for this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Embedding(_)
                | Error::VectorStore(_)
                | Error::Request(_)
                | Error::Queue(_)
                | Error::Redis(_)
                | Error::Database(_)
        )
    }

    /// Whether the service should be reported as unavailable to callers.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Short machine-readable code stored in the processing log.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Database(_) => "database",
            Error::NotFound(_) => "not_found",
            Error::Config(_) => "config",
            Error::Embedding(_) => "provider",
            Error::VectorStore(_) => "vector_store",
            Error::Data(_) => "data",
            Error::Consistency(_) => "consistency",
            Error::Queue(_) => "queue",
            Error::Redis(_) => "redis",
            Error::Conflict(_) => "conflict",
            Error::Search(_) => "search",
            Error::Serialization(_) => "serialization",
            Error::InvalidInput(_) => "invalid_input",
            Error::Request(_) => "request",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        // Connectivity loss is reported as a degraded queue backend.
        if e.is_io_error()
            || e.is_connection_refusal()
            || e.is_connection_dropped()
            || e.is_timeout()
        {
            Error::Queue(e.to_string())
        } else {
            Error::Redis(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("vector_enabled is false".to_string());
        assert_eq!(err.to_string(), "Configuration error: vector_enabled is false");
    }

    #[test]
    fn test_error_display_vector_store() {
        let err = Error::VectorStore("HTTP 503".to_string());
        assert_eq!(err.to_string(), "Vector store error: HTTP 503");
    }

    #[test]
    fn test_error_display_conflict() {
        let err = Error::Conflict("task already running".to_string());
        assert_eq!(err.to_string(), "Conflict: task already running");
    }

    #[test]
    fn test_provider_and_store_errors_are_retryable() {
        assert!(Error::Embedding("timeout".into()).is_retryable());
        assert!(Error::VectorStore("502".into()).is_retryable());
        assert!(Error::Queue("redis down".into()).is_retryable());
    }

    #[test]
    fn test_config_and_data_errors_are_terminal() {
        assert!(!Error::Config("off".into()).is_retryable());
        assert!(!Error::Data("empty description".into()).is_retryable());
        assert!(!Error::InvalidInput("bad".into()).is_retryable());
    }

    #[test]
    fn test_only_config_errors_are_unavailable() {
        assert!(Error::Config("no api key".into()).is_unavailable());
        assert!(!Error::Embedding("timeout".into()).is_unavailable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Embedding("x".into()).code(), "provider");
        assert_eq!(Error::VectorStore("x".into()).code(), "vector_store");
        assert_eq!(Error::Config("x".into()).code(), "config");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_redis_connectivity_loss_is_queue_error() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: Error = redis::RedisError::from(refused).into();
        assert!(matches!(err, Error::Queue(_)));
        assert_eq!(err.code(), "queue");
        assert!(err.is_retryable());

        let script = redis::RedisError::from((redis::ErrorKind::TypeError, "bad reply"));
        let err: Error = script.into();
        assert!(matches!(err, Error::Redis(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
