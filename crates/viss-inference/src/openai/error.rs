//! Provider error classification.

use viss_core::Error;

/// Provider-side failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIErrorCode {
    AuthenticationError,
    RateLimitExceeded,
    ModelNotFound,
    ContextLengthExceeded,
    ServerError,
    Unknown,
}

impl OpenAIErrorCode {
    /// Determine the class from HTTP status and error type.
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401, _) | (403, _) => Self::AuthenticationError,
            (429, _) => Self::RateLimitExceeded,
            (404, _) | (_, "model_not_found") => Self::ModelNotFound,
            (400, _) if error_type.contains("context_length") => Self::ContextLengthExceeded,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationError => "authentication",
            Self::RateLimitExceeded => "rate_limited",
            Self::ModelNotFound => "model_not_found",
            Self::ContextLengthExceeded => "context_length",
            Self::ServerError => "server_error",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimitExceeded | Self::ServerError)
    }
}

/// Provider failures surface as embedding errors; the worker retries them
/// under its own bounded policy.
pub fn to_viss_error(code: OpenAIErrorCode, status: u16, message: &str) -> Error {
    Error::Embedding(format!("provider returned {status} ({}): {message}", code.as_str()))
}
