//! Block store interface and backends for DittoFS.
//!
//! A block store is a flat, durable key/value namespace holding fixed-size
//! blocks of file content. The flush engine (`dittofs-flush`) writes dirty
//! cache slices here and reconstructs file ranges from here on cache misses.
//!
//! # Components
//!
//! - [`BlockStore`] - The async put/get seam every backend implements
//! - [`BlockKeyScheme`] - Deterministic mapping from (content id, chunk,
//!   block) to a storage key
//! - [`MemoryBlockStore`] - In-process backend for tests and development
//! - [`FsBlockStore`] - Local-directory backend mapping keys to paths
//! - [`StoreConfig`] / [`store_from_config`] - Backend selection from
//!   deployment configuration
//!
//! # Key layout
//!
//! Every block lives at `{prefix}{content_id}/chunk-{c}/block-{b}`, e.g.
//! `blocks/export/report.pdf/chunk-0/block-0`. The content identifier
//! already carries its share-name prefix, so the scheme never adds one.
//!
//! # Example
//!
//! ```
//! use dittofs_store::{BlockKeyScheme, BlockStore, MemoryBlockStore};
//! use bytes::Bytes;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), dittofs_store::StoreError> {
//! let store = MemoryBlockStore::new();
//! let keys = BlockKeyScheme::new("blocks/");
//!
//! let key = keys.key("export/report.pdf", 0, 0);
//! store.put(&key, Bytes::from_static(b"hello")).await?;
//! assert_eq!(store.get(&key).await?.as_ref(), b"hello");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;
use bytes::Bytes;

mod config;
mod error;
mod fs;
mod keys;
mod memory;

pub use config::{store_from_config, StoreBackend, StoreConfig};
pub use error::StoreError;
pub use fs::FsBlockStore;
pub use keys::{BlockKeyScheme, BLOCK_SIZE, DEFAULT_KEY_PREFIX};
pub use memory::MemoryBlockStore;

/// A durable key/value store for opaque blocks of file content.
///
/// Both operations may be slow or remote; callers are expected to bound
/// their own concurrency. Implementations must be safe to share across
/// tasks via `Arc<dyn BlockStore>`.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Store `data` under `key`, overwriting any previous value.
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError>;

    /// Fetch the block stored under `key`.
    ///
    /// Fails with [`StoreError::NotFound`] if the key is absent.
    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;
}
