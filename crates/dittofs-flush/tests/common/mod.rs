//! Shared harness for flush engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use dittofs_flush::testing::{InstrumentedStore, MemoryCache};
use dittofs_flush::{FlushConfig, Flusher};
use dittofs_store::MemoryBlockStore;

/// A flusher wired to an instrumented in-memory store and cache.
pub struct TestEngine {
    pub cache: Arc<MemoryCache>,
    pub store: Arc<InstrumentedStore>,
    pub backing: Arc<MemoryBlockStore>,
    pub flusher: Arc<Flusher>,
}

/// Build an engine with a plain (no delay, no gate) instrumented store.
pub fn engine(config: FlushConfig) -> TestEngine {
    let backing = Arc::new(MemoryBlockStore::new());
    let store = Arc::new(InstrumentedStore::wrap(backing.clone()));
    engine_with(config, backing, store)
}

/// Build an engine around a pre-configured instrumented store.
pub fn engine_with(
    config: FlushConfig,
    backing: Arc<MemoryBlockStore>,
    store: Arc<InstrumentedStore>,
) -> TestEngine {
    let cache = Arc::new(MemoryCache::new());
    let flusher = Flusher::builder()
        .cache(cache.clone())
        .store(store.clone())
        .config(config)
        .build()
        .expect("flusher construction");
    TestEngine {
        cache,
        store,
        backing,
        flusher: Arc::new(flusher),
    }
}

/// Poll `cond` until it holds, panicking after five seconds.
pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}
