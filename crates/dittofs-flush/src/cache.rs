//! The write-back cache seam consumed by the flush engine.
//!
//! The cache itself lives outside this crate - it is the component that
//! absorbs protocol writes into crash-safe local storage (e.g. a
//! memory-mapped file) before the flush engine confirms them in the block
//! store. The engine depends on exactly three cache operations, captured
//! by [`WriteBackCache`].
//!
//! # Durability contract
//!
//! The cache's own persistence is what makes an asynchronous upload safe
//! to defer. The engine never treats a slice as durable in the block
//! store until [`WriteBackCache::mark_slice_flushed`] has returned
//! successfully, and never assumes uploaded-but-unmarked data is
//! recoverable other than through a fresh recovery scan.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CacheError;

/// Identifies all of a file's content in the cache and block store.
///
/// By convention the identifier embeds the share name as its first path
/// segment (`export/report.pdf`), giving per-tenant namespacing without
/// depending on any numeric file handle format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(String);

impl ContentId {
    /// View the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ContentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque byte identifier the cache keys cached files by.
///
/// In this model the handle bytes are the UTF-8 content identifier, which
/// is what lets recovery derive upload keys from nothing but the cache's
/// file listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileHandle(Bytes);

impl FileHandle {
    /// Wrap raw handle bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Build the handle for a content identifier.
    pub fn for_content(content_id: &ContentId) -> Self {
        Self(Bytes::copy_from_slice(content_id.as_str().as_bytes()))
    }

    /// The raw handle bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Derive the content identifier the handle stands for.
    ///
    /// Fails with [`CacheError::InvalidHandle`] if the bytes are not
    /// valid UTF-8.
    pub fn content_id(&self) -> Result<ContentId, CacheError> {
        std::str::from_utf8(&self.0)
            .map(ContentId::from)
            .map_err(|_| CacheError::InvalidHandle)
    }
}

/// Cache-assigned identifier for one pending slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SliceId(pub u64);

impl std::fmt::Display for SliceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contiguous dirty byte range not yet confirmed in the block store.
///
/// `offset` is relative to the start of `chunk`. The payload position in
/// the file is fully determined by `(chunk, offset, data.len())`.
#[derive(Debug, Clone)]
pub struct PendingSlice {
    /// Cache-assigned slice identifier.
    pub id: SliceId,
    /// Chunk the slice belongs to.
    pub chunk: u64,
    /// Byte offset of the slice within its chunk.
    pub offset: u64,
    /// The dirty bytes.
    pub data: Bytes,
}

impl PendingSlice {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the slice carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A block-store key now holding (part of) a flushed slice's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    /// The storage key.
    pub key: String,
}

impl BlockRef {
    /// Wrap a storage key.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// The three cache operations the flush engine depends on.
///
/// Implementations must be safe to share across tasks via
/// `Arc<dyn WriteBackCache>`.
#[async_trait]
pub trait WriteBackCache: Send + Sync {
    /// Enumerate all files currently tracked by the cache.
    ///
    /// Used only during recovery.
    async fn list_files(&self) -> Result<Vec<FileHandle>, CacheError>;

    /// Slices of `handle` not yet confirmed flushed.
    ///
    /// Returns an empty vector, not an error, when the file is clean.
    async fn dirty_slices(&self, handle: &FileHandle) -> Result<Vec<PendingSlice>, CacheError>;

    /// Record that a slice's data now resides at the given block refs.
    ///
    /// Must be idempotent: marking an already-flushed slice again is not
    /// an error, so the engine can safely retry after partial failures.
    async fn mark_slice_flushed(
        &self,
        handle: &FileHandle,
        slice: SliceId,
        blocks: Vec<BlockRef>,
    ) -> Result<(), CacheError>;
}
