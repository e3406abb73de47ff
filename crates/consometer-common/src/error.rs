//! Error types for the consometer
//!
//! Stage-level failures use [`ConsometerError`]; per-project fetch failures use
//! [`FetchError`], which is carried as data inside a poll outcome and never propagated.

use thiserror::Error;

/// Result type alias using ConsometerError
pub type Result<T> = std::result::Result<T, ConsometerError>;

/// Unified error type for consometer operations
#[derive(Debug, Error)]
pub enum ConsometerError {
    // Identity service errors (authentication, project listing, endpoint resolution)
    #[error("Identity error: {0}")]
    Identity(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Message broker errors
    #[error("Broker error: {0}")]
    Broker(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Monitoring backend errors
    #[error("Metrics error: {0}")]
    Metrics(String),
}

/// Failure to fetch the usage of a single project
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("poll deadline exceeded before the project was fetched")]
    DeadlineExceeded,
}

impl FetchError {
    /// Short, stable label used to group failures in the run summary
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport",
            FetchError::UnexpectedStatus(_) => "unexpected_status",
            FetchError::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl From<serde_json::Error> for ConsometerError {
    fn from(err: serde_json::Error) -> Self {
        ConsometerError::Serialization(err.to_string())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConsometerError::Broker("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_fetch_error_kind() {
        assert_eq!(FetchError::UnexpectedStatus(503).kind(), "unexpected_status");
        assert_eq!(FetchError::DeadlineExceeded.kind(), "deadline_exceeded");
        assert!(FetchError::UnexpectedStatus(503).to_string().contains("503"));
    }

    #[test]
    fn test_json_errors_are_serialization_errors() {
        let err: ConsometerError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, ConsometerError::Serialization(_)));
    }
}
