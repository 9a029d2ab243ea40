//! Deterministic block key derivation.

/// Fixed block granularity: 4 MiB, except for a final partial block.
pub const BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Default deployment-level key namespace.
pub const DEFAULT_KEY_PREFIX: &str = "blocks/";

/// Maps (content identifier, chunk index, block index) to a storage key.
///
/// The mapping is pure and injective over its three inputs: distinct
/// triples always produce distinct keys, and the same triple always
/// produces the same key. The content identifier is used verbatim - it is
/// expected to already carry its own share-name prefix, and the scheme
/// never prepends anything beyond the deployment prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockKeyScheme {
    prefix: String,
}

impl BlockKeyScheme {
    /// Create a scheme with the given deployment prefix (e.g. `blocks/`).
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The deployment prefix this scheme was built with.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Derive the storage key for one block of one chunk of a content id.
    pub fn key(&self, content_id: &str, chunk: u64, block: u64) -> String {
        format!("{}{content_id}/chunk-{chunk}/block-{block}", self.prefix)
    }
}

impl Default for BlockKeyScheme {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}
