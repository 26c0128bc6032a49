//! Error types for state synchronization.

use crate::types::WireFormat;
use thiserror::Error;

/// Main error type for serializer and manager operations.
///
/// Every variant carries the name of the operation that failed so callers
/// can report it without extra context.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{operation}: unsupported wire format '{format}'")]
    UnsupportedFormat {
        operation: &'static str,
        format: String,
    },

    #[error("{operation}: missing required fields: {}", .missing.join(", "))]
    MissingFields {
        operation: &'static str,
        missing: Vec<String>,
    },

    #[error("{operation}: failed to encode {format} payload: {message}")]
    Serialization {
        operation: &'static str,
        format: WireFormat,
        message: String,
    },

    #[error("{operation}: malformed {format} payload: {message}")]
    Deserialization {
        operation: &'static str,
        format: WireFormat,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    pub(crate) fn encode(
        operation: &'static str,
        format: WireFormat,
        err: impl std::fmt::Display,
    ) -> Self {
        SyncError::Serialization {
            operation,
            format,
            message: err.to_string(),
        }
    }

    pub(crate) fn decode(
        operation: &'static str,
        format: WireFormat,
        err: impl std::fmt::Display,
    ) -> Self {
        SyncError::Deserialization {
            operation,
            format,
            message: err.to_string(),
        }
    }

    /// Name of the operation that raised this error, if it carries one.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            SyncError::UnsupportedFormat { operation, .. }
            | SyncError::MissingFields { operation, .. }
            | SyncError::Serialization { operation, .. }
            | SyncError::Deserialization { operation, .. } => Some(operation),
            SyncError::InvalidConfig(_) => None,
        }
    }
}

/// Result type for state synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
