//! Domain-level error taxonomy for skirmish.

/// Skirmish domain errors.
#[derive(Debug, thiserror::Error)]
pub enum SkirmishError {
    /// A required backend address, credential, or tool binding is missing.
    /// Fatal to the triggering call, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A remote agent backend failed (non-2xx, timeout, transport error).
    /// Retried per backend policy before it surfaces.
    #[error("backend error: {message}")]
    Backend {
        message: String,
        status: Option<u16>,
    },

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("capsule not found: {0}")]
    CapsuleNotFound(String),

    /// Malformed request shape from a caller, surfaced immediately.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SkirmishError {
    /// Build a `Backend` error without an HTTP status.
    pub fn backend(message: impl Into<String>) -> Self {
        SkirmishError::Backend {
            message: message.into(),
            status: None,
        }
    }

    /// Build a `Backend` error carrying the HTTP status that produced it.
    pub fn backend_status(message: impl Into<String>, status: u16) -> Self {
        SkirmishError::Backend {
            message: message.into(),
            status: Some(status),
        }
    }
}

/// Result type for skirmish domain operations.
pub type Result<T> = std::result::Result<T, SkirmishError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SkirmishError::Configuration("attacker endpoint missing".to_string());
        assert!(err.to_string().contains("configuration error"));

        let err = SkirmishError::RunNotFound("r-404".to_string());
        assert!(err.to_string().contains("run not found"));
        assert!(err.to_string().contains("r-404"));
    }

    #[test]
    fn test_backend_error_carries_status() {
        let err = SkirmishError::backend_status("model loading", 503);
        match err {
            SkirmishError::Backend { status, .. } => assert_eq!(status, Some(503)),
            other => panic!("unexpected error: {other}"),
        }
    }
}
