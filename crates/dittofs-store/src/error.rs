use thiserror::Error;

/// Errors produced by block store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested key does not exist in the store.
    #[error("block not found: {key}")]
    NotFound {
        /// The key that was requested.
        key: String,
    },

    /// The key cannot be mapped to a storage location.
    ///
    /// Returned by path-based backends for keys containing empty or
    /// parent-directory segments.
    #[error("invalid block key: {key}")]
    InvalidKey {
        /// The offending key.
        key: String,
    },

    /// An I/O error from the underlying storage medium.
    #[error("block store i/o error for {key}: {source}")]
    Io {
        /// The key being accessed when the error occurred.
        key: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A backend-specific failure (network, service unavailability, ...).
    #[error("block store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether this error is a missing-key lookup rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
