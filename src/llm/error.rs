//! LM error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during LM operations
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request cancelled")]
    Cancelled,
}

impl LlmError {
    /// Check if this error was caused by caller-driven cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LlmError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_message() {
        let err = LlmError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("502"));
        assert!(msg.contains("bad gateway"));
    }

    #[test]
    fn test_is_cancelled() {
        assert!(LlmError::Cancelled.is_cancelled());
        assert!(!LlmError::InvalidResponse("x".to_string()).is_cancelled());
    }
}
