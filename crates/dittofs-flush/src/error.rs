//! Error types for the flush engine.

use thiserror::Error;

use crate::cache::ContentId;
use crate::stats::RecoveryStats;
use dittofs_store::StoreError;

/// Errors surfaced by write-back cache implementations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A file handle whose bytes are not valid UTF-8 and therefore
    /// cannot be mapped to a content identifier.
    #[error("file handle is not a valid content identifier")]
    InvalidHandle,

    /// The file is not tracked by the cache.
    #[error("unknown file handle")]
    UnknownFile,

    /// The slice is neither pending nor flushed for this file.
    #[error("unknown slice {0}")]
    UnknownSlice(crate::cache::SliceId),

    /// A backend-specific cache failure.
    #[error("cache backend: {0}")]
    Backend(String),
}

/// Errors surfaced by the flusher facade and background uploader.
#[derive(Debug, Error)]
pub enum FlushError {
    /// A required collaborator was not supplied at construction time.
    #[error("flush engine not configured: {0}")]
    NotConfigured(&'static str),

    /// A configuration value is outside its valid range.
    #[error("invalid flush configuration: {0}")]
    InvalidConfig(&'static str),

    /// The cache rejected an operation.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The block store rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The engine is shutting down; the slice remains dirty in the cache
    /// and will be picked up by the next recovery pass.
    #[error("flush engine is shut down")]
    Shutdown,

    /// A blocking flush left one or more slices dirty.
    #[error("{failed} slice(s) failed to flush for {content_id}")]
    PartialFlush {
        /// Content identifier the flush was for.
        content_id: ContentId,
        /// Number of slices still dirty after the flush attempt.
        failed: usize,
    },
}

/// Errors surfaced by the startup recovery scan.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The cache could not be enumerated; nothing was recovered.
    #[error("recovery scan failed: {0}")]
    Scan(#[from] CacheError),

    /// The scan completed but some slices could not be re-uploaded.
    ///
    /// The stats are fully populated for diagnostics; the failed slices
    /// remain dirty in the cache and a re-run will retry exactly them.
    /// The caller decides whether partial recovery is fatal to startup.
    #[error("recovery completed with {failed} failed slice(s)")]
    Partial {
        /// Number of slices that failed to upload or be marked.
        failed: u64,
        /// Aggregate statistics for the pass.
        stats: RecoveryStats,
    },
}
