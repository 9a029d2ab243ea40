//! Write-back cache flush engine for DittoFS.
//!
//! DittoFS absorbs protocol writes into a crash-safe local write-back
//! cache and confirms them in a slower, remote block store after the
//! fact. This crate is the component that reconciles the two: it owns
//! startup crash recovery of unflushed data, a bounded asynchronous
//! upload pipeline driven by protocol commit points, a blocking
//! finalization path driven by close points, and a parallel read path
//! that reconstructs file ranges from the block store on cache miss.
//!
//! # Components
//!
//! - [`Flusher`] - The protocol-facing facade; owns everything below
//! - [`RecoveryScanner`] - One-shot startup reconciliation of slices
//!   that survived an unclean shutdown
//! - [`WriteBackCache`] - The seam to the external cache (dirty-slice
//!   enumeration and flush marking)
//! - [`FlushConfig`] - Parallelism bounds and queue capacity
//! - [`testing`] - In-memory fault-injectable cache and instrumented
//!   store for integration tests
//!
//! The block store seam lives in [`dittofs_store`].
//!
//! # Control flow
//!
//! Writes accumulate in the cache outside this crate. A protocol commit
//! calls [`Flusher::flush_remaining_async`], which enqueues dirty slices
//! and returns immediately - durability at that point rests on the
//! cache's own crash-safe persistence. A protocol close calls
//! [`Flusher::wait_for_uploads`] then [`Flusher::flush_remaining`] so the
//! remaining sub-block tail is uploaded without racing in-flight async
//! work. A cache-miss read calls [`Flusher::read_blocks`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use dittofs_flush::{Flusher, FlushConfig};
//! use dittofs_flush::testing::MemoryCache;
//! use dittofs_store::MemoryBlockStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let cache = Arc::new(MemoryCache::new());
//! let store = Arc::new(MemoryBlockStore::new());
//!
//! let flusher = Flusher::builder()
//!     .cache(cache.clone())
//!     .store(store)
//!     .config(FlushConfig::default())
//!     .build()?;
//!
//! // Startup: reconcile anything a previous run left unflushed.
//! let stats = flusher.recover().await?;
//! assert!(stats.is_clean());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
mod config;
mod engine;
mod error;
mod flusher;
mod layout;
mod recovery;
mod stats;
mod uploader;

/// Testing utilities: fault-injectable in-memory cache, instrumented
/// block store, and payload generators.
pub mod testing;

pub use cache::{BlockRef, ContentId, FileHandle, PendingSlice, SliceId, WriteBackCache};
pub use config::{
    FlushConfig, DEFAULT_PARALLEL_DOWNLOADS, DEFAULT_PARALLEL_UPLOADS,
    DEFAULT_UPLOAD_QUEUE_CAPACITY,
};
pub use error::{CacheError, FlushError, RecoveryError};
pub use flusher::{Flusher, FlusherBuilder};
pub use recovery::RecoveryScanner;
pub use stats::{RecoveryStats, UploaderStats, UploaderStatsSnapshot};

pub use dittofs_store::BLOCK_SIZE;
