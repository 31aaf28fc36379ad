//! Error types for ganglet

use thiserror::Error;

/// Main error type for ganglet
#[derive(Error, Debug)]
pub enum GangletError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot error, fatal for the scheduling cycle
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Statement error, aborts the current job
    #[error("Statement error: {0}")]
    Statement(String),

    /// Pod-group not found
    #[error("Pod-group not found: {0}")]
    PodGroupNotFound(String),

    /// Pod not found
    #[error("Pod not found: {0}")]
    PodNotFound(String),

    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for ganglet operations
pub type GangletResult<T> = Result<T, GangletError>;

impl From<serde_json::Error> for GangletError {
    fn from(err: serde_json::Error) -> Self {
        GangletError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GangletError {
    fn from(err: toml::de::Error) -> Self {
        GangletError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GangletError::Statement("task already allocated".to_string());
        assert_eq!(err.to_string(), "Statement error: task already allocated");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GangletError = io_err.into();
        assert!(matches!(err, GangletError::Io(_)));
    }
}
