//! Error types shared across the crate.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AnalystError>;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum AnalystError {
    /// Error from the OpenAI API
    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The policy oracle could not produce a usable verdict
    #[error("Policy check failed: {message}")]
    PolicyCheckFailed { message: String },

    /// The model returned something the orchestration cannot act on
    #[error("Model behavior error: {message}")]
    ModelBehaviorError { message: String },

    /// Tool execution error
    #[error("Tool execution error: {message}")]
    ToolExecutionError { message: String },

    /// Session misuse (e.g. submitting while a response is pending)
    #[error("Session error: {0}")]
    SessionError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Maximum dispatch turns exceeded
    #[error("Maximum turns exceeded: {max_turns}")]
    MaxTurnsExceeded { max_turns: usize },

    /// A model call did not return within the configured bound
    #[error("Model call timed out after {seconds}s")]
    ModelTimeout { seconds: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AnalystError::MaxTurnsExceeded { max_turns: 10 };
        assert_eq!(err.to_string(), "Maximum turns exceeded: 10");

        let err = AnalystError::PolicyCheckFailed {
            message: "oracle unreachable".to_string(),
        };
        assert_eq!(err.to_string(), "Policy check failed: oracle unreachable");

        let err = AnalystError::ModelTimeout { seconds: 30 };
        assert_eq!(err.to_string(), "Model call timed out after 30s");
    }

    #[test]
    fn test_error_from_serde() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: AnalystError = json_err.into();
        assert!(matches!(err, AnalystError::SerializationError(_)));
    }

    #[test]
    fn test_result_type() {
        fn example_function() -> Result<String> {
            Ok("success".to_string())
        }

        assert_eq!(example_function().unwrap(), "success");
    }
}
