//! Error types for codegraph-taint
//!
//! Rules never return errors: they log and skip, or signal through kill
//! flags. Errors surface from IR construction, configuration, and path
//! reconstruction.

use thiserror::Error;

use crate::config::ConfigError;

/// Main error type for codegraph-taint operations
#[derive(Debug, Error)]
pub enum TaintError {
    /// A required piece of analysis state is missing (e.g. a broken predecessor chain)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A value or type shape the analysis cannot model
    #[error("Unsupported construct: {0}")]
    UnsupportedConstruct(String),

    /// Jump target label never bound in a method body
    #[error("Unresolved label '{label}' in method {method}")]
    UnresolvedLabel { method: String, label: String },

    /// Method signature not present in the program
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl TaintError {
    /// Create an invalid-state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        TaintError::InvalidState(msg.into())
    }

    /// Create an unsupported-construct error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        TaintError::UnsupportedConstruct(msg.into())
    }
}

/// Result type alias for taint operations
pub type Result<T> = std::result::Result<T, TaintError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TaintError::invalid_state("missing predecessor 7");
        assert_eq!(err.to_string(), "Invalid state: missing predecessor 7");
    }

    #[test]
    fn test_unresolved_label_display() {
        let err = TaintError::UnresolvedLabel {
            method: "<Main: void main()>".to_string(),
            label: "else".to_string(),
        };
        assert!(err.to_string().contains("'else'"));
        assert!(err.to_string().contains("<Main: void main()>"));
    }

    #[test]
    fn test_config_error_conversion() {
        let err: TaintError = ConfigError::Validation("bad".to_string()).into();
        assert!(matches!(err, TaintError::Config(_)));
    }
}
