//! In-memory block store backend.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::{BlockStore, StoreError};

/// A block store keeping all blocks in process memory.
///
/// Used by tests and single-process development deployments. Blocks are
/// held in a lock-free concurrent map, so the store can be shared across
/// tasks via `Arc` without contention.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<String, Bytes>,
}

impl MemoryBlockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks currently stored.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the store holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whether a block exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.blocks.contains_key(key)
    }

    /// Snapshot of all stored keys, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.blocks.iter().map(|e| e.key().clone()).collect()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        self.blocks.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        self.blocks
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryBlockStore::new();
        store
            .put("blocks/s/f/chunk-0/block-0", Bytes::from_static(b"abc"))
            .await
            .unwrap();

        let data = store.get("blocks/s/f/chunk-0/block-0").await.unwrap();
        assert_eq!(data.as_ref(), b"abc");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let store = MemoryBlockStore::new();
        let err = store.get("blocks/s/f/chunk-0/block-9").await.unwrap_err();
        assert!(err.is_not_found(), "expected NotFound, got {err}");
    }

    #[tokio::test]
    async fn put_overwrites_existing_block() {
        let store = MemoryBlockStore::new();
        store.put("k", Bytes::from_static(b"old")).await.unwrap();
        store.put("k", Bytes::from_static(b"new")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_ref(), b"new");
        assert_eq!(store.len(), 1);
    }
}
