//! In-memory write-back cache double.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::cache::{BlockRef, FileHandle, PendingSlice, SliceId, WriteBackCache};
use crate::error::CacheError;

#[derive(Debug, Default)]
struct FileState {
    dirty: BTreeMap<SliceId, PendingSlice>,
    flushed: BTreeMap<SliceId, Vec<BlockRef>>,
    mark_calls: BTreeMap<SliceId, u64>,
}

/// An in-memory [`WriteBackCache`] with full dirty/flushed bookkeeping.
///
/// Beyond the trait, it exposes the write side a protocol adapter would
/// normally drive ([`write_slice`](Self::write_slice)) plus inspection
/// helpers and fault injection for exercising the engine's failure
/// paths.
#[derive(Debug, Default)]
pub struct MemoryCache {
    files: DashMap<FileHandle, FileState>,
    next_slice: AtomicU64,
    fail_marks: AtomicBool,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a file for `content_id`, returning its handle.
    ///
    /// The handle bytes are the content identifier, matching the
    /// production model where recovery derives one from the other.
    pub fn open(&self, content_id: &str) -> FileHandle {
        let handle = FileHandle::new(Bytes::copy_from_slice(content_id.as_bytes()));
        self.files.entry(handle.clone()).or_default();
        handle
    }

    /// Record a dirty slice, as a protocol write would.
    pub fn write_slice(
        &self,
        handle: &FileHandle,
        chunk: u64,
        offset: u64,
        data: impl Into<Bytes>,
    ) -> SliceId {
        let id = SliceId(self.next_slice.fetch_add(1, Ordering::Relaxed));
        let slice = PendingSlice {
            id,
            chunk,
            offset,
            data: data.into(),
        };
        self.files
            .entry(handle.clone())
            .or_default()
            .dirty
            .insert(id, slice);
        id
    }

    /// Number of slices still dirty for the file.
    pub fn dirty_count(&self, handle: &FileHandle) -> usize {
        self.files.get(handle).map_or(0, |f| f.dirty.len())
    }

    /// Block refs recorded for a flushed slice, if any.
    pub fn flushed_blocks(&self, handle: &FileHandle, slice: SliceId) -> Option<Vec<BlockRef>> {
        self.files
            .get(handle)
            .and_then(|f| f.flushed.get(&slice).cloned())
    }

    /// How many times `mark_slice_flushed` was called for a slice.
    pub fn mark_count(&self, handle: &FileHandle, slice: SliceId) -> u64 {
        self.files
            .get(handle)
            .and_then(|f| f.mark_calls.get(&slice).copied())
            .unwrap_or(0)
    }

    /// Make every subsequent `mark_slice_flushed` fail (or stop failing).
    pub fn set_fail_marks(&self, fail: bool) {
        self.fail_marks.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl WriteBackCache for MemoryCache {
    async fn list_files(&self) -> Result<Vec<FileHandle>, CacheError> {
        Ok(self.files.iter().map(|e| e.key().clone()).collect())
    }

    async fn dirty_slices(&self, handle: &FileHandle) -> Result<Vec<PendingSlice>, CacheError> {
        Ok(self
            .files
            .get(handle)
            .map(|f| f.dirty.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn mark_slice_flushed(
        &self,
        handle: &FileHandle,
        slice: SliceId,
        blocks: Vec<BlockRef>,
    ) -> Result<(), CacheError> {
        if self.fail_marks.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("injected mark failure".to_string()));
        }
        let mut file = self.files.get_mut(handle).ok_or(CacheError::UnknownFile)?;
        *file.mark_calls.entry(slice).or_insert(0) += 1;

        if file.dirty.remove(&slice).is_some() {
            file.flushed.insert(slice, blocks);
            Ok(())
        } else if file.flushed.contains_key(&slice) {
            // Already marked; retries after partial failures are fine.
            Ok(())
        } else {
            Err(CacheError::UnknownSlice(slice))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slice_moves_from_dirty_to_flushed() {
        let cache = MemoryCache::new();
        let handle = cache.open("export/a.txt");
        let id = cache.write_slice(&handle, 0, 0, Bytes::from_static(b"data"));
        assert_eq!(cache.dirty_count(&handle), 1);

        cache
            .mark_slice_flushed(&handle, id, vec![BlockRef::new("k")])
            .await
            .unwrap();
        assert_eq!(cache.dirty_count(&handle), 0);
        assert_eq!(
            cache.flushed_blocks(&handle, id),
            Some(vec![BlockRef::new("k")])
        );
    }

    #[tokio::test]
    async fn marking_twice_is_idempotent() {
        let cache = MemoryCache::new();
        let handle = cache.open("export/a.txt");
        let id = cache.write_slice(&handle, 0, 0, Bytes::from_static(b"data"));

        let refs = vec![BlockRef::new("k")];
        cache
            .mark_slice_flushed(&handle, id, refs.clone())
            .await
            .unwrap();
        cache.mark_slice_flushed(&handle, id, refs).await.unwrap();
        assert_eq!(cache.mark_count(&handle, id), 2);
        assert_eq!(cache.dirty_count(&handle), 0);
    }

    #[tokio::test]
    async fn unknown_slice_is_an_error() {
        let cache = MemoryCache::new();
        let handle = cache.open("export/a.txt");
        let err = cache
            .mark_slice_flushed(&handle, SliceId(42), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::UnknownSlice(SliceId(42))));
    }

    #[tokio::test]
    async fn injected_mark_failure() {
        let cache = MemoryCache::new();
        let handle = cache.open("export/a.txt");
        let id = cache.write_slice(&handle, 0, 0, Bytes::from_static(b"data"));

        cache.set_fail_marks(true);
        assert!(cache.mark_slice_flushed(&handle, id, vec![]).await.is_err());
        // The slice stayed dirty through the failure.
        assert_eq!(cache.dirty_count(&handle), 1);

        cache.set_fail_marks(false);
        cache
            .mark_slice_flushed(&handle, id, vec![BlockRef::new("k")])
            .await
            .unwrap();
        assert_eq!(cache.dirty_count(&handle), 0);
    }
}
