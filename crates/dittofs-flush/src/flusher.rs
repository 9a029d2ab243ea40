//! The protocol-facing flush facade.
//!
//! Protocol adapters (NFS, SMB) call into this type at four well-defined
//! points:
//!
//! - **commit** (NFS COMMIT, SMB flush) -> [`Flusher::flush_remaining_async`]
//! - **close** -> [`Flusher::wait_for_uploads`] then [`Flusher::flush_remaining`]
//! - **read miss** -> [`Flusher::read_blocks`]
//! - **write** (optional) -> [`Flusher::on_write_complete`]
//!
//! No operation is allowed to silently lose a write: every failure path
//! leaves the affected slice dirty in the cache, visible to the next
//! recovery pass or explicit flush retry.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::cache::{ContentId, FileHandle, WriteBackCache};
use crate::config::FlushConfig;
use crate::engine::EngineCore;
use crate::error::FlushError;
use crate::layout;
use crate::recovery::RecoveryScanner;
use crate::stats::{RecoveryStats, UploaderStats, UploaderStatsSnapshot};
use crate::uploader::{BackgroundUploader, SubmitError, UploadJob, UploadTask};
use dittofs_store::{BlockKeyScheme, BlockStore, BLOCK_SIZE, DEFAULT_KEY_PREFIX};

use crate::error::RecoveryError;

/// Builder for [`Flusher`].
///
/// Construction fails explicitly when a required collaborator is
/// missing; operations never silently no-op on an unconfigured engine.
pub struct FlusherBuilder {
    cache: Option<Arc<dyn WriteBackCache>>,
    store: Option<Arc<dyn BlockStore>>,
    key_prefix: String,
    config: FlushConfig,
}

impl FlusherBuilder {
    fn new() -> Self {
        Self {
            cache: None,
            store: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            config: FlushConfig::default(),
        }
    }

    /// The write-back cache holding dirty slices.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn WriteBackCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The block store uploads land in.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn BlockStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Deployment-level key namespace (default `blocks/`).
    #[must_use]
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Engine configuration (defaults per [`FlushConfig::default`]).
    #[must_use]
    pub fn config(mut self, config: FlushConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the flusher and start its background uploader.
    ///
    /// Must be called within a Tokio runtime. Fails with
    /// [`FlushError::NotConfigured`] if the cache or store is missing and
    /// [`FlushError::InvalidConfig`] for out-of-range settings.
    pub fn build(self) -> Result<Flusher, FlushError> {
        let cache = self
            .cache
            .ok_or(FlushError::NotConfigured("write-back cache"))?;
        let store = self.store.ok_or(FlushError::NotConfigured("block store"))?;
        self.config.validate()?;
        let config = self.config;

        let core = Arc::new(EngineCore {
            cache,
            store,
            keys: BlockKeyScheme::new(self.key_prefix),
            upload_permits: Arc::new(Semaphore::new(config.parallel_uploads)),
            download_permits: Arc::new(Semaphore::new(config.parallel_downloads)),
            stats: Arc::new(UploaderStats::new()),
            cancel: CancellationToken::new(),
        });
        let uploader = BackgroundUploader::spawn(
            Arc::clone(&core),
            config.upload_queue_capacity,
            config.parallel_uploads,
        );

        Ok(Flusher {
            core,
            uploader,
            config,
        })
    }
}

/// Reconciles the write-back cache with the block store.
///
/// Owns the background upload pipeline and the startup recovery scanner,
/// and exposes the protocol-facing flush/read API. Share one instance
/// per server via `Arc<Flusher>`.
///
/// # Concurrency
///
/// Uploads and downloads are bounded globally by
/// [`FlushConfig::parallel_uploads`] / [`FlushConfig::parallel_downloads`];
/// recovery and live traffic share the same bounds. Only
/// [`wait_for_uploads`](Self::wait_for_uploads) and
/// [`flush_remaining`](Self::flush_remaining) block the caller.
pub struct Flusher {
    core: Arc<EngineCore>,
    uploader: BackgroundUploader,
    config: FlushConfig,
}

impl Flusher {
    /// Start building a flusher.
    pub fn builder() -> FlusherBuilder {
        FlusherBuilder::new()
    }

    /// The startup recovery scanner for this engine.
    pub fn recovery_scanner(&self) -> RecoveryScanner {
        RecoveryScanner::new(Arc::clone(&self.core))
    }

    /// Run the startup recovery pass. See [`RecoveryScanner::run`].
    pub async fn recover(&self) -> Result<RecoveryStats, RecoveryError> {
        self.recovery_scanner().run().await
    }

    /// Enqueue all of a file's dirty slices for asynchronous upload.
    ///
    /// Called at protocol commit points. Returns once every slice is
    /// either queued or, when the queue is full, synchronously uploaded
    /// as the documented backpressure fallback. Durability at this point
    /// rests on the cache's own crash-safe persistence, not on the block
    /// store write; errors are only enumeration failures or a fallback
    /// upload failure.
    pub async fn flush_remaining_async(
        &self,
        share: &str,
        handle: &FileHandle,
        content_id: &ContentId,
    ) -> Result<(), FlushError> {
        let slices = self.core.cache.dirty_slices(handle).await?;
        if slices.is_empty() {
            trace!(share, %content_id, "commit with no dirty slices");
            return Ok(());
        }
        debug!(share, %content_id, slices = slices.len(), "commit: enqueueing dirty slices");

        for slice in slices {
            let guard = self.uploader.registry().begin(content_id);
            let job = UploadJob::new(
                UploadTask {
                    handle: handle.clone(),
                    content_id: content_id.clone(),
                    slice,
                },
                guard,
            );
            match self.uploader.try_submit(job) {
                Ok(()) => {}
                Err((SubmitError::QueueFull { capacity }, job)) => {
                    self.core.stats.record_fallback();
                    warn!(
                        share,
                        %content_id,
                        capacity,
                        "upload queue full; falling back to synchronous upload"
                    );
                    self.sync_upload(job).await?;
                }
                Err((SubmitError::Shutdown, _)) => return Err(FlushError::Shutdown),
            }
        }
        Ok(())
    }

    /// Block until all in-flight asynchronous uploads for `content_id`
    /// have completed, successfully or not.
    ///
    /// Establishes the happens-before edge that lets a subsequent
    /// [`flush_remaining`](Self::flush_remaining) run without racing an
    /// async upload of the same data.
    pub async fn wait_for_uploads(&self, content_id: &ContentId) -> Result<(), FlushError> {
        self.uploader.registry().wait_idle(content_id).await;
        Ok(())
    }

    /// Synchronously upload every slice still dirty for the file.
    ///
    /// Called at protocol close points, after
    /// [`wait_for_uploads`](Self::wait_for_uploads). Returns only after
    /// every remaining slice is uploaded-and-marked or has failed; a
    /// failure is surfaced so the close itself fails rather than
    /// silently discarding data (the failed slices stay dirty).
    pub async fn flush_remaining(
        &self,
        share: &str,
        handle: &FileHandle,
        content_id: &ContentId,
    ) -> Result<(), FlushError> {
        let slices = self.core.cache.dirty_slices(handle).await?;
        if slices.is_empty() {
            return Ok(());
        }
        debug!(share, %content_id, slices = slices.len(), "close: flushing remaining slices");

        let mut failed = 0usize;
        for slice in slices {
            let Ok(_permit) = self.core.upload_permits.acquire().await else {
                return Err(FlushError::Shutdown);
            };
            match self.core.upload_slice(handle, content_id, &slice).await {
                Ok(bytes) => self.core.stats.record_complete(bytes),
                Err(e) => {
                    failed += 1;
                    self.core.stats.record_failure();
                    error!(
                        share,
                        %content_id,
                        slice = %slice.id,
                        error = %e,
                        "close-time flush failed"
                    );
                }
            }
        }

        if failed > 0 {
            Err(FlushError::PartialFlush {
                content_id: content_id.clone(),
                failed,
            })
        } else {
            Ok(())
        }
    }

    /// Reconstruct `[offset, offset + length)` of a chunk from the block
    /// store.
    ///
    /// Called on a cache-miss read. Fetches exactly the blocks spanning
    /// the range, concurrently and in bounded fashion, and returns the
    /// reassembled bytes in offset order. A short or absent trailing
    /// block truncates the result at end-of-file; an absent leading
    /// block is an error. The caller is responsible for populating the
    /// cache with the result.
    pub async fn read_blocks(
        &self,
        share: &str,
        content_id: &ContentId,
        chunk: u64,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, FlushError> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        let blocks = layout::spanning_blocks(offset, length);
        let first = *blocks.start();
        trace!(
            share,
            %content_id,
            chunk,
            offset,
            length,
            blocks = *blocks.end() - first + 1,
            "read miss: fetching blocks"
        );

        let fetches: Vec<Result<Bytes, FlushError>> = stream::iter(blocks.map(|block| {
            let key = self.core.keys.key(content_id.as_str(), chunk, block);
            let core = Arc::clone(&self.core);
            async move {
                let Ok(_permit) = core.download_permits.acquire().await else {
                    return Err(FlushError::Shutdown);
                };
                tokio::select! {
                    () = core.cancel.cancelled() => Err(FlushError::Shutdown),
                    res = core.store.get(&key) => res.map_err(FlushError::from),
                }
            }
        }))
        .buffered(self.config.parallel_downloads)
        .collect()
        .await;

        let mut assembled = BytesMut::new();
        for (i, fetched) in fetches.into_iter().enumerate() {
            match fetched {
                Ok(data) => {
                    let short = (data.len() as u64) < BLOCK_SIZE;
                    assembled.extend_from_slice(&data);
                    if short {
                        break;
                    }
                }
                // A missing block after the first is end-of-file.
                Err(FlushError::Store(e)) if e.is_not_found() && i > 0 => break,
                Err(e) => return Err(e),
            }
        }

        // Trim to the requested range within the assembled blocks.
        // Truncation is fine: offsets within a chunk fit in usize.
        #[allow(clippy::cast_possible_truncation)]
        let skip = (offset - first * BLOCK_SIZE) as usize;
        if skip >= assembled.len() {
            return Ok(Bytes::new());
        }
        #[allow(clippy::cast_possible_truncation)]
        let end = assembled.len().min(skip + length as usize);
        Ok(assembled.freeze().slice(skip..end))
    }

    /// Hook invoked after a write lands in the cache.
    ///
    /// When [`FlushConfig::eager_block_upload`] is enabled and the write
    /// just completed a full 4 MiB block, the file's block-aligned dirty
    /// slices are enqueued ahead of the next commit point. Purely
    /// opportunistic: never required for correctness, never blocks on a
    /// full queue, and never returns an error - failures are logged and
    /// the data simply waits for the next commit.
    pub async fn on_write_complete(
        &self,
        share: &str,
        handle: &FileHandle,
        content_id: &ContentId,
        chunk: u64,
        offset: u64,
        length: u64,
    ) {
        if !self.config.eager_block_upload || length == 0 {
            return;
        }
        let end = offset + length;
        if end % BLOCK_SIZE != 0 {
            return;
        }

        let slices = match self.core.cache.dirty_slices(handle).await {
            Ok(slices) => slices,
            Err(e) => {
                debug!(share, %content_id, error = %e, "eager flush skipped");
                return;
            }
        };

        for slice in slices {
            let block_complete = slice.chunk == chunk
                && slice.offset % BLOCK_SIZE == 0
                && (slice.len() as u64) % BLOCK_SIZE == 0
                && !slice.is_empty()
                && slice.offset + slice.len() as u64 <= end;
            if !block_complete {
                continue;
            }
            let guard = self.uploader.registry().begin(content_id);
            let job = UploadJob::new(
                UploadTask {
                    handle: handle.clone(),
                    content_id: content_id.clone(),
                    slice,
                },
                guard,
            );
            if let Err((e, _job)) = self.uploader.try_submit(job) {
                trace!(share, %content_id, error = %e, "eager enqueue skipped");
                return;
            }
        }
    }

    /// Point-in-time uploader statistics.
    pub fn stats(&self) -> UploaderStatsSnapshot {
        self.core.stats.snapshot()
    }

    /// Gracefully shut down the background uploader.
    ///
    /// In-flight remote calls are cancelled and their slices stay dirty;
    /// see the uploader's shutdown contract.
    pub async fn shutdown(&self) {
        self.uploader.shutdown().await;
    }

    /// Queue-full fallback: upload one slice inline, under the same
    /// global upload bound as the background workers.
    async fn sync_upload(&self, job: UploadJob) -> Result<(), FlushError> {
        let Ok(_permit) = self.core.upload_permits.acquire().await else {
            return Err(FlushError::Shutdown);
        };
        let result = self
            .core
            .upload_slice(&job.task.handle, &job.task.content_id, &job.task.slice)
            .await;
        match &result {
            Ok(bytes) => self.core.stats.record_complete(*bytes),
            Err(_) => self.core.stats.record_failure(),
        }
        result.map(|_| ())
    }
}
