//! Custom error types for audit-trail
//!
//! This module defines the error hierarchy for the capture, diff and write
//! phases using thiserror for ergonomic error definitions.

use thiserror::Error;

/// The main error type for audit-trail operations
#[derive(Error, Debug)]
pub enum AuditError {
    /// A field type has no normalization rule and no fallback converter
    #[error("Unsupported type '{type_kind}': {reason}")]
    UnsupportedType { type_kind: String, reason: String },

    /// An entity's primary key could not be resolved
    #[error("Cannot resolve identity of {class}: {reason}")]
    IdentityResolution { class: String, reason: String },

    /// The audit store failed to persist a drain
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration-related errors (settings, provisioning)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The host supplied no metadata for a class
    #[error("No mapping metadata for class {class}")]
    Metadata { class: String },

    /// A lazy reference could not be loaded
    #[error("Entity {class} could not be materialized")]
    Materialization { class: String },

    /// Invalid arguments on the read side
    #[error("Validation error: {0}")]
    Validation(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// File-backed store errors
    #[error("Storage error: {0}")]
    Storage(String),
}

impl AuditError {
    /// Create an "unsupported type" error
    pub fn unsupported(type_kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_kind: type_kind.into(),
            reason: reason.into(),
        }
    }

    /// Create an identity resolution error for a class
    pub fn identity(class: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IdentityResolution {
            class: class.into(),
            reason: reason.into(),
        }
    }

    /// Create a "missing metadata" error
    pub fn metadata(class: impl Into<String>) -> Self {
        Self::Metadata {
            class: class.into(),
        }
    }

    /// Check if this error aborts the prepare phase of a commit cycle
    pub fn is_prepare_failure(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedType { .. }
                | Self::IdentityResolution { .. }
                | Self::Metadata { .. }
                | Self::Materialization { .. }
        )
    }

    /// Check if this is a persistence error
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    /// Check if this is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for AuditError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<rusqlite::Error> for AuditError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Result type alias for audit-trail operations
pub type AuditResult<T> = Result<T, AuditError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuditError::Configuration("test error".into());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_unsupported_type_error() {
        let err = AuditError::unsupported("geometry", "no converter registered");
        assert_eq!(
            err.to_string(),
            "Unsupported type 'geometry': no converter registered"
        );
        assert!(err.is_prepare_failure());
    }

    #[test]
    fn test_identity_error() {
        let err = AuditError::identity("App\\User", "no identifier field");
        assert_eq!(
            err.to_string(),
            "Cannot resolve identity of App\\User: no identifier field"
        );
        assert!(err.is_prepare_failure());
        assert!(!err.is_persistence());
    }

    #[test]
    fn test_from_sqlite_error() {
        let err: AuditError = rusqlite::Error::InvalidQuery.into();
        assert!(err.is_persistence());
        assert!(!err.is_prepare_failure());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let audit_err: AuditError = io_err.into();
        assert!(matches!(audit_err, AuditError::Io(_)));
    }
}
