//! Flush engine configuration.

use serde::Deserialize;

/// Default bound on concurrent block-store uploads.
pub const DEFAULT_PARALLEL_UPLOADS: usize = 4;

/// Default bound on concurrent block-store downloads.
pub const DEFAULT_PARALLEL_DOWNLOADS: usize = 4;

/// Default capacity of the asynchronous upload queue.
pub const DEFAULT_UPLOAD_QUEUE_CAPACITY: usize = 1000;

/// Configuration for the flush engine.
///
/// The upload and download bounds are global per engine instance:
/// recovery, background uploads, and synchronous fallbacks all share the
/// same limiter so concurrent activity can never exceed the configured
/// parallelism regardless of how many files carry pending data.
#[derive(Debug, Clone, Deserialize)]
pub struct FlushConfig {
    /// Maximum concurrent uploads to the block store.
    #[serde(default = "default_parallel_uploads")]
    pub parallel_uploads: usize,

    /// Maximum concurrent downloads from the block store.
    #[serde(default = "default_parallel_downloads")]
    pub parallel_downloads: usize,

    /// Capacity of the asynchronous upload queue. Once full, commits fall
    /// back to synchronous uploads instead of blocking or dropping data.
    #[serde(default = "default_upload_queue_capacity")]
    pub upload_queue_capacity: usize,

    /// Eagerly enqueue a block for upload as soon as a write completes
    /// it, ahead of the next commit point. Off by default; never required
    /// for correctness, only for an earlier upload start.
    #[serde(default)]
    pub eager_block_upload: bool,
}

fn default_parallel_uploads() -> usize {
    DEFAULT_PARALLEL_UPLOADS
}

fn default_parallel_downloads() -> usize {
    DEFAULT_PARALLEL_DOWNLOADS
}

fn default_upload_queue_capacity() -> usize {
    DEFAULT_UPLOAD_QUEUE_CAPACITY
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            parallel_uploads: DEFAULT_PARALLEL_UPLOADS,
            parallel_downloads: DEFAULT_PARALLEL_DOWNLOADS,
            upload_queue_capacity: DEFAULT_UPLOAD_QUEUE_CAPACITY,
            eager_block_upload: false,
        }
    }
}

impl FlushConfig {
    /// Set the upload parallelism bound.
    #[must_use]
    pub fn with_parallel_uploads(mut self, n: usize) -> Self {
        self.parallel_uploads = n;
        self
    }

    /// Set the download parallelism bound.
    #[must_use]
    pub fn with_parallel_downloads(mut self, n: usize) -> Self {
        self.parallel_downloads = n;
        self
    }

    /// Set the upload queue capacity.
    #[must_use]
    pub fn with_upload_queue_capacity(mut self, n: usize) -> Self {
        self.upload_queue_capacity = n;
        self
    }

    /// Enable or disable eager block upload.
    #[must_use]
    pub fn with_eager_block_upload(mut self, enabled: bool) -> Self {
        self.eager_block_upload = enabled;
        self
    }

    /// Check all values are within their valid ranges.
    pub(crate) fn validate(&self) -> Result<(), crate::FlushError> {
        if self.parallel_uploads == 0 {
            return Err(crate::FlushError::InvalidConfig(
                "parallel_uploads must be at least 1",
            ));
        }
        if self.parallel_downloads == 0 {
            return Err(crate::FlushError::InvalidConfig(
                "parallel_downloads must be at least 1",
            ));
        }
        if self.upload_queue_capacity == 0 {
            return Err(crate::FlushError::InvalidConfig(
                "upload_queue_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}
