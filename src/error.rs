//! Error types for the engagement reconciler

use thiserror::Error;

/// Result type for reconciler operations
pub type Result<T> = std::result::Result<T, EngagementError>;

/// Engagement error types
#[derive(Error, Debug)]
pub enum EngagementError {
    /// Content item not found
    #[error("Content item not found: {0}")]
    NotFound(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Remote rejected the request
    #[error("Remote error: HTTP {status} - {message}")]
    Remote { status: u16, message: String },

    /// Remote call exceeded its deadline
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// Payload from the backend did not match the expected shape
    #[error("Malformed payload: {0}")]
    Normalization(String),

    /// Realtime subscription error
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngagementError {
    /// Whether this error came from the collaborator's transport and is worth
    /// recovering from locally.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngagementError::Network(_)
                | EngagementError::Timeout(_)
                | EngagementError::Remote { status: 500..=599, .. }
        )
    }
}

impl From<serde_json::Error> for EngagementError {
    fn from(err: serde_json::Error) -> Self {
        EngagementError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EngagementError::Network("reset".into()).is_transient());
        assert!(EngagementError::Timeout(10).is_transient());
        assert!(EngagementError::Remote { status: 503, message: "busy".into() }.is_transient());
        assert!(!EngagementError::Remote { status: 403, message: "rls".into() }.is_transient());
        assert!(!EngagementError::Normalization("bad".into()).is_transient());
    }
}
