use thiserror::Error;

/// Errors surfaced by the moderation core.
#[derive(Debug, Error)]
pub enum ModerationError {
    /// Malformed duration or command text. User-correctable.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// The toxicity model could not be loaded. Fatal for the detector.
    #[error("Toxicity model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The target is not in the state the operation expects (e.g. unmute of a non-muted user).
    #[error("{0}")]
    NotInTargetState(String),

    /// Vector length mismatch while comparing a token against a toxic term.
    #[error("Vectors must have the same length, got {left} and {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ModerationError>;

impl ModerationError {
    /// Whether the error should be reported back to the user instead of logged as a failure.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            ModerationError::InvalidFormat(_)
                | ModerationError::PermissionDenied(_)
                | ModerationError::NotInTargetState(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_classification() {
        assert!(ModerationError::InvalidFormat("x".to_string()).is_user_facing());
        assert!(ModerationError::NotInTargetState("User is not muted".to_string()).is_user_facing());
        assert!(!ModerationError::ModelUnavailable("missing".to_string()).is_user_facing());
        assert!(!ModerationError::Storage(anyhow::anyhow!("db down")).is_user_facing());
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let err = ModerationError::DimensionMismatch { left: 3, right: 4 };
        assert_eq!(err.to_string(), "Vectors must have the same length, got 3 and 4");
    }
}
