//! Error types shared across chunkflow crates

use thiserror::Error;

/// Result type alias for chunkflow setup operations
pub type Result<T> = std::result::Result<T, ChunkflowError>;

/// Errors raised while loading configuration or scenario files
#[derive(Error, Debug)]
pub enum ChunkflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

impl ChunkflowError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid value error for a named setting
    pub fn invalid_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_value_message() {
        let err = ChunkflowError::invalid_value("CHUNKFLOW_POLL_PERIOD_SECS", "abc");
        assert_eq!(
            err.to_string(),
            "Invalid value for CHUNKFLOW_POLL_PERIOD_SECS: 'abc'"
        );
    }
}
