//! Custom error types for triage.
//!
//! Stage and orchestration failures are reported as data on the result
//! types; this error covers everything around them (configuration, context
//! loading, backend construction) where `?` propagation is the right shape.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for triage operations
#[derive(Error, Debug)]
pub enum TriageError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Input Errors
    // =========================================================================
    /// The failure context is incomplete or malformed
    #[error("Invalid failure context: {reason}")]
    InvalidContext { reason: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// The reasoning backend could not be constructed or reached
    #[error("Backend error: {message}")]
    Backend { message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TriageError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid context error
    pub fn invalid_context(reason: impl Into<String>) -> Self {
        Self::InvalidContext {
            reason: reason.into(),
        }
    }

    /// Create a backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            Self::InvalidContext { .. } => 6,
            Self::Backend { .. } => 3,
            _ => 2,
        }
    }
}

/// Type alias for triage results
pub type Result<T> = std::result::Result<T, TriageError>;

// =============================================================================
// Orchestration Errors
// =============================================================================

/// Why an agentic run ended without an accepted fix.
///
/// Never escapes `Orchestrator::orchestrate`; its Display text becomes the
/// `error` field of the result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationError {
    #[error("Analysis agent failed: {reason}")]
    AnalysisFailed { reason: String },

    #[error("Investigation agent failed: {reason}")]
    InvestigationFailed { reason: String },

    #[error("Fix generation agent failed: {reason}")]
    FixGenerationFailed { reason: String },

    #[error("Orchestration timed out after {elapsed_ms}ms")]
    TimedOut { elapsed_ms: u64 },

    #[error("Fix confidence below threshold after {iterations} iterations")]
    BelowThreshold { iterations: u32 },
}

impl OrchestrationError {
    /// Timeouts are final; nothing else runs after them.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TriageError::invalid_config("maxIterations", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: maxIterations - must be at least 1"
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(TriageError::config("test").exit_code(), 7);
        assert_eq!(TriageError::invalid_config("a", "b").exit_code(), 7);
        assert_eq!(TriageError::invalid_context("test").exit_code(), 6);
        assert_eq!(TriageError::backend("test").exit_code(), 3);
    }

    #[test]
    fn test_config_with_path() {
        let path = PathBuf::from("/test/.triage/settings.json");
        let err = TriageError::config_with_path("failed to parse", path.clone());
        if let TriageError::Config {
            message,
            path: opt_path,
        } = err
        {
            assert_eq!(message, "failed to parse");
            assert_eq!(opt_path, Some(path));
        } else {
            panic!("Wrong error variant");
        }
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: TriageError = io_err.into();
        assert!(matches!(err, TriageError::Io(_)));
        assert!(err.to_string().contains("no such file"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_orchestration_error_messages() {
        let err = OrchestrationError::AnalysisFailed {
            reason: "backend call failed: 503".to_string(),
        };
        assert_eq!(err.to_string(), "Analysis agent failed: backend call failed: 503");

        let err = OrchestrationError::TimedOut { elapsed_ms: 1234 };
        assert_eq!(err.to_string(), "Orchestration timed out after 1234ms");
        assert!(err.is_timeout());

        let err = OrchestrationError::BelowThreshold { iterations: 3 };
        assert_eq!(
            err.to_string(),
            "Fix confidence below threshold after 3 iterations"
        );
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: TriageError = json_err.into();
        assert!(matches!(err, TriageError::Json(_)));
    }
}
