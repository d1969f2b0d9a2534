//! Error types for EmberDB core.

use emberdb_codec::{CodecError, Value};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in EmberDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] emberdb_storage::StorageError),

    /// Codec error (encoding, decoding, paths).
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A document, query or update was rejected before any mutation.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the problem.
        message: String,
    },

    /// A unique index already holds the key.
    #[error("unique constraint violated on field {field:?}: key {key:?} already exists")]
    UniqueViolation {
        /// Indexed field name.
        field: String,
        /// The offending key (`None` for an undefined value).
        key: Option<Value>,
    },

    /// Too many log lines failed to decode during load.
    #[error(
        "{corrupt} of {total} log lines are corrupt, above the {threshold} threshold; \
         this usually means the serialization hooks do not match the data"
    )]
    CorruptionThresholdExceeded {
        /// Number of lines that failed to decode.
        corrupt: usize,
        /// Number of non-empty lines read.
        total: usize,
        /// Configured threshold (fraction of lines).
        threshold: f64,
    },

    /// The serialization hooks are not inverses of each other.
    #[error("serialization hooks are not inverses: {message}")]
    SerializationAsymmetry {
        /// Description of the failed round trip.
        message: String,
    },

    /// The store configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The ordered tree violates one of its structural invariants.
    #[error("tree invariant violated: {message}")]
    TreeInvariant {
        /// Description of the violation.
        message: String,
    },

    /// Encryption failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Decryption failed.
    #[error("decryption failed: {message}")]
    DecryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Invalid key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a unique constraint violation.
    pub fn unique_violation(field: impl Into<String>, key: Option<Value>) -> Self {
        Self::UniqueViolation {
            field: field.into(),
            key,
        }
    }

    /// Creates a serialization asymmetry error.
    pub fn serialization_asymmetry(message: impl Into<String>) -> Self {
        Self::SerializationAsymmetry {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a tree invariant error.
    pub fn tree_invariant(message: impl Into<String>) -> Self {
        Self::TreeInvariant {
            message: message.into(),
        }
    }

    /// Creates an encryption failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates a decryption failed error.
    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { expected, actual }
    }

    /// Returns true for errors caused by bad input rather than by the store.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::Codec(
                    CodecError::InvalidFieldName { .. }
                        | CodecError::InvalidPath { .. }
                        | CodecError::InvalidValue { .. }
                )
        )
    }
}
