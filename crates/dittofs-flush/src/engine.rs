//! Shared engine state and the single-slice upload primitive.
//!
//! Every upload path - background workers, the recovery scanner, the
//! queue-full synchronous fallback, and close-time flushes - funnels
//! through [`EngineCore::upload_slice`], so the durability rules live in
//! exactly one place: a slice is flushed only once every block is stored
//! AND the cache has acknowledged the mark.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::cache::{BlockRef, ContentId, FileHandle, PendingSlice, WriteBackCache};
use crate::error::FlushError;
use crate::stats::UploaderStats;
use dittofs_store::{BlockKeyScheme, BlockStore};

/// Collaborators and limiters shared by every component of the engine.
pub(crate) struct EngineCore {
    pub cache: Arc<dyn WriteBackCache>,
    pub store: Arc<dyn BlockStore>,
    pub keys: BlockKeyScheme,
    /// Global bound on in-flight uploads, shared by recovery and live
    /// traffic so the two can never stack their parallelism.
    pub upload_permits: Arc<Semaphore>,
    /// Global bound on in-flight downloads.
    pub download_permits: Arc<Semaphore>,
    pub stats: Arc<UploaderStats>,
    /// Cancelled on shutdown; aborts in-flight remote calls.
    pub cancel: CancellationToken,
}

impl EngineCore {
    /// Upload one slice to the block store and mark it flushed.
    ///
    /// The payload is split along 4 MiB block boundaries relative to the
    /// slice's offset within its chunk; each piece is stored under its
    /// derived key, and only after every put succeeds is the cache asked
    /// to mark the slice flushed with the full set of block refs.
    ///
    /// Cancellation or any failure leaves the slice dirty in the cache.
    /// The caller is expected to hold an upload permit.
    ///
    /// Returns the number of payload bytes uploaded.
    pub async fn upload_slice(
        &self,
        handle: &FileHandle,
        content_id: &ContentId,
        slice: &PendingSlice,
    ) -> Result<u64, FlushError> {
        let pieces = crate::layout::split_into_blocks(slice.offset, slice.len());
        let mut refs = Vec::with_capacity(pieces.len());

        for piece in pieces {
            let key = self.keys.key(content_id.as_str(), slice.chunk, piece.block);
            let data = slice.data.slice(piece.range);
            tokio::select! {
                () = self.cancel.cancelled() => return Err(FlushError::Shutdown),
                res = self.store.put(&key, data) => res?,
            }
            refs.push(BlockRef::new(key));
        }

        tokio::select! {
            () = self.cancel.cancelled() => Err(FlushError::Shutdown),
            res = self.cache.mark_slice_flushed(handle, slice.id, refs) => {
                res?;
                trace!(%content_id, slice = %slice.id, len = slice.len(), "slice flushed");
                Ok(slice.len() as u64)
            }
        }
    }
}
