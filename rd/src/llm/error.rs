//! LLM error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Model returned no text")]
    EmptyResponse,

    #[error("LLM configuration error: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Check if this is a rate limit error
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, .. } => *status >= 500 || *status == 408,
            LlmError::Network(_) => true,
            LlmError::EmptyResponse => true,
            LlmError::InvalidResponse(_) | LlmError::Config(_) | LlmError::Json(_) => false,
        }
    }

    /// Get the retry duration if this is a rate limit error
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_carries_retry_after() {
        let err = LlmError::RateLimited {
            retry_after: Duration::from_secs(42),
        };
        assert!(err.is_rate_limit());
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(42)));
    }

    #[test]
    fn test_server_errors_retry_client_errors_do_not() {
        for status in [500, 502, 503, 408] {
            let err = LlmError::ApiError {
                status,
                message: String::new(),
            };
            assert!(err.is_retryable(), "status {} should retry", status);
            assert_eq!(err.retry_after(), None);
        }
        for status in [400, 401, 403, 404] {
            let err = LlmError::ApiError {
                status,
                message: String::new(),
            };
            assert!(!err.is_retryable(), "status {} should not retry", status);
        }
    }

    #[test]
    fn test_config_errors_are_final() {
        assert!(!LlmError::Config("no key".to_string()).is_retryable());
        assert!(!LlmError::InvalidResponse("bad".to_string()).is_retryable());
        assert!(LlmError::EmptyResponse.is_retryable());
    }
}
