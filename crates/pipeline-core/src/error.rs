//! Centralized error types for the pipeline board.

use thiserror::Error;

/// Failure reported by an external collaborator (store, auth, storage).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),
}

/// Result type for collaborator calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Session expired: started {age_minutes} minutes ago")]
    SessionExpired { age_minutes: i64 },

    #[error("Could not save move of card '{card_id}': {reason}")]
    PersistenceWriteFailed { card_id: String, reason: String },

    #[error("Could not load preferences: {0}")]
    PreferenceFetchFailed(String),

    #[error("Invalid move: {reason}")]
    InvalidMove { reason: String },

    #[error("Invalid card '{card_id}': {reason}")]
    InvalidCard { card_id: String, reason: String },

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// A move naming a card the board does not know.
    pub fn unknown_card(card_id: &str) -> Self {
        Self::InvalidMove {
            reason: format!("card not found: {}", card_id),
        }
    }

    /// A move naming a column the board does not know.
    pub fn unknown_column(column_id: &str) -> Self {
        Self::InvalidMove {
            reason: format!("column not found: {}", column_id),
        }
    }

    /// Create an invalid card error.
    pub fn invalid_card(card_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidCard {
            card_id: card_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Errors that end the session and send the user back to sign-in.
    pub fn requires_sign_in(&self) -> bool {
        matches!(self, Self::NotAuthenticated | Self::SessionExpired { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_card_is_invalid_move() {
        let err = PipelineError::unknown_card("c9");
        assert!(matches!(err, PipelineError::InvalidMove { .. }));
        assert_eq!(err.to_string(), "Invalid move: card not found: c9");
    }

    #[test]
    fn test_requires_sign_in() {
        assert!(PipelineError::NotAuthenticated.requires_sign_in());
        assert!(PipelineError::SessionExpired { age_minutes: 600 }.requires_sign_in());
        assert!(!PipelineError::unknown_column("x").requires_sign_in());
    }
}
