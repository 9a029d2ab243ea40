//! Backend selection from deployment configuration.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::{BlockStore, FsBlockStore, MemoryBlockStore, StoreError, DEFAULT_KEY_PREFIX};

/// Which backend a deployment stores its blocks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-process memory; blocks do not survive a restart.
    Memory,
    /// A directory on the local filesystem.
    Filesystem,
}

/// Deployment configuration for the block store.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Backend to store blocks in.
    pub backend: StoreBackend,
    /// Root directory for the `filesystem` backend.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Deployment-level key namespace prepended to every block key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

/// Build a block store from deployment configuration.
///
/// Fails with [`StoreError::Backend`] when the configuration is
/// incomplete, e.g. a `filesystem` backend with no `root`.
pub fn store_from_config(cfg: &StoreConfig) -> Result<Arc<dyn BlockStore>, StoreError> {
    match cfg.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryBlockStore::new())),
        StoreBackend::Filesystem => {
            let root = cfg.root.clone().ok_or_else(|| {
                StoreError::Backend("filesystem backend requires a root directory".to_string())
            })?;
            Ok(Arc::new(FsBlockStore::new(root)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_from_config() {
        let cfg: StoreConfig = serde_json::from_str(r#"{ "backend": "memory" }"#).unwrap();
        assert_eq!(cfg.backend, StoreBackend::Memory);
        assert_eq!(cfg.key_prefix, "blocks/");
        store_from_config(&cfg).unwrap();
    }

    #[test]
    fn filesystem_backend_requires_root() {
        let cfg: StoreConfig = serde_json::from_str(r#"{ "backend": "filesystem" }"#).unwrap();
        let err = store_from_config(&cfg).unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        let cfg: StoreConfig =
            serde_json::from_str(r#"{ "backend": "filesystem", "root": "/tmp/blocks" }"#).unwrap();
        store_from_config(&cfg).unwrap();
    }
}
