//! Error types for the hydro data tools.

use thiserror::Error;

/// Result type alias using DataError.
pub type DataResult<T> = Result<T, DataError>;

/// Primary error type for data-layer operations.
///
/// The taxonomy matters for control flow: accessors fall through to the
/// next candidate only on `NotFound`, connectors retry only on
/// `Transport`, and everything else propagates unchanged.
#[derive(Debug, Error)]
pub enum DataError {
    // === Addressing errors ===
    #[error("No data at {address}")]
    NotFound { address: String },

    #[error("Destination already exists: {address}")]
    AlreadyExists { address: String },

    #[error("Template error: {0}")]
    Template(String),

    // === Transport errors ===
    #[error("Transport failure at {address}: {message}")]
    Transport { address: String, message: String },

    #[error("Permission denied at {address}: {message}")]
    PermissionDenied { address: String, message: String },

    // === Payload errors ===
    #[error("Format error: {0}")]
    Format(String),

    // === Infrastructure errors ===
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DataError {
    /// Shorthand for a missing address.
    pub fn not_found(address: impl Into<String>) -> Self {
        DataError::NotFound {
            address: address.into(),
        }
    }

    /// Shorthand for a transport failure at an address.
    pub fn transport(address: impl Into<String>, message: impl Into<String>) -> Self {
        DataError::Transport {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an access denial at an address.
    pub fn permission(address: impl Into<String>, message: impl Into<String>) -> Self {
        DataError::PermissionDenied {
            address: address.into(),
            message: message.into(),
        }
    }

    /// True for a plain "nothing at this address" outcome.
    ///
    /// This is the only error kind that lets an accessor advance to the
    /// next resolved candidate.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DataError::NotFound { .. })
    }

    /// True for failures worth retrying with backoff.
    ///
    /// Auth/ACL failures are deliberately excluded: retrying those only
    /// hammers the server and delays the inevitable surfacing.
    pub fn is_transient(&self) -> bool {
        matches!(self, DataError::Transport { .. })
    }
}

impl From<std::io::Error> for DataError {
    fn from(err: std::io::Error) -> Self {
        DataError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::Internal(format!("JSON error: {}", err))
    }
}
