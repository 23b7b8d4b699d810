//! Error types for attrcache operations

use thiserror::Error;

/// Configuration errors.
///
/// These are fatal: they are surfaced at the call that discovers them and
/// are never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown attribute `{attribute}` on record type {record_type}")]
    UnknownAttribute {
        record_type: String,
        attribute: String,
    },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Malformed "by attribute" key input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyInputError {
    #[error("Key input cannot be empty")]
    Empty,

    #[error("Key input has {got} values but {expected} key attributes are configured")]
    ArityMismatch { expected: usize, got: usize },

    #[error("Key input names {got:?} do not match key attributes {expected:?}")]
    NameMismatch {
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error("A single value cannot address composite key attributes {attributes:?}")]
    ScalarForCompositeKey { attributes: Vec<String> },
}

/// Cache backend failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Cache backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Failed to serialize cache value: {reason}")]
    Serialization { reason: String },

    #[error("Failed to deserialize cache value: {reason}")]
    Deserialization { reason: String },
}

/// Errors raised by the record (persistence) collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Duplicate {record_type} record with key {key}")]
    Duplicate { record_type: String, key: String },

    #[error("{record_type} record not found: {key}")]
    NotFound { record_type: String, key: String },

    #[error("Write failed for {record_type}: {reason}")]
    WriteFailed { record_type: String, reason: String },

    #[error("{record_type} record has not been persisted yet")]
    NotPersisted { record_type: String },
}

/// Master error type for all attrcache errors.
#[derive(Debug, Clone, Error)]
pub enum AttrCacheError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid key input: {0}")]
    KeyInput(#[from] KeyInputError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),
}

impl AttrCacheError {
    /// Returns true if this error came from the cache backend.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

/// Result type alias for attrcache operations.
pub type AttrCacheResult<T> = Result<T, AttrCacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display_unknown_attribute() {
        let err = ConfigError::UnknownAttribute {
            record_type: "user".to_string(),
            attribute: "emial".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("emial"));
        assert!(msg.contains("user"));
    }

    #[test]
    fn test_key_input_error_display_arity() {
        let err = KeyInputError::ArityMismatch {
            expected: 2,
            got: 3,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3 values"));
        assert!(msg.contains("2 key attributes"));
    }

    #[test]
    fn test_backend_error_display_unavailable() {
        let err = BackendError::Unavailable {
            reason: "connection refused".to_string(),
        };
        assert!(format!("{}", err).contains("connection refused"));
    }

    #[test]
    fn test_master_error_from_conversions() {
        let err: AttrCacheError = KeyInputError::Empty.into();
        assert!(matches!(err, AttrCacheError::KeyInput(KeyInputError::Empty)));
        assert!(!err.is_backend());

        let err: AttrCacheError = BackendError::Transaction {
            reason: "boom".to_string(),
        }
        .into();
        assert!(err.is_backend());
        assert!(format!("{}", err).starts_with("Backend error"));
    }
}
