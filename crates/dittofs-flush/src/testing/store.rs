//! Instrumented block store wrapper.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;

use dittofs_store::{BlockStore, StoreError};

/// Wraps a block store with concurrency tracking, artificial latency,
/// a manual gate, and put fault injection.
///
/// The in-flight counters record the peak number of concurrent `put` /
/// `get` calls observed, which is what the engine's at-most-bound
/// concurrency property asserts against.
pub struct InstrumentedStore {
    inner: Arc<dyn BlockStore>,
    puts_in_flight: AtomicUsize,
    peak_puts: AtomicUsize,
    gets_in_flight: AtomicUsize,
    peak_gets: AtomicUsize,
    put_count: AtomicU64,
    get_count: AtomicU64,
    op_delay: Duration,
    fail_puts_remaining: AtomicI64,
    gate: Option<Arc<Semaphore>>,
}

impl InstrumentedStore {
    /// Wrap an existing store.
    pub fn wrap(inner: Arc<dyn BlockStore>) -> Self {
        Self {
            inner,
            puts_in_flight: AtomicUsize::new(0),
            peak_puts: AtomicUsize::new(0),
            gets_in_flight: AtomicUsize::new(0),
            peak_gets: AtomicUsize::new(0),
            put_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            op_delay: Duration::ZERO,
            fail_puts_remaining: AtomicI64::new(0),
            gate: None,
        }
    }

    /// Sleep this long inside every operation, widening the window in
    /// which concurrent operations overlap.
    #[must_use]
    pub fn with_op_delay(mut self, delay: Duration) -> Self {
        self.op_delay = delay;
        self
    }

    /// Gate every `put` on a semaphore permit. With zero initial permits
    /// the store blocks until the test releases it via
    /// `gate.add_permits(n)`; each put consumes one permit.
    #[must_use]
    pub fn with_put_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Make the next `n` puts fail with a backend error.
    pub fn fail_next_puts(&self, n: i64) {
        self.fail_puts_remaining.store(n, Ordering::SeqCst);
    }

    /// Peak number of concurrent `put` calls observed.
    pub fn peak_puts(&self) -> usize {
        self.peak_puts.load(Ordering::SeqCst)
    }

    /// Peak number of concurrent `get` calls observed.
    pub fn peak_gets(&self) -> usize {
        self.peak_gets.load(Ordering::SeqCst)
    }

    /// Total `put` calls, including failed ones.
    pub fn put_count(&self) -> u64 {
        self.put_count.load(Ordering::SeqCst)
    }

    /// Total `get` calls, including failed ones.
    pub fn get_count(&self) -> u64 {
        self.get_count.load(Ordering::SeqCst)
    }

    /// Zero the operation counters and peaks.
    pub fn reset_counters(&self) {
        self.put_count.store(0, Ordering::SeqCst);
        self.get_count.store(0, Ordering::SeqCst);
        self.peak_puts.store(0, Ordering::SeqCst);
        self.peak_gets.store(0, Ordering::SeqCst);
    }

    async fn run_put(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(StoreError::Backend("put gate closed".to_string())),
            }
        }
        if !self.op_delay.is_zero() {
            tokio::time::sleep(self.op_delay).await;
        }
        if self.fail_puts_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
            return Err(StoreError::Backend("injected put failure".to_string()));
        }
        self.inner.put(key, data).await
    }

    async fn run_get(&self, key: &str) -> Result<Bytes, StoreError> {
        if !self.op_delay.is_zero() {
            tokio::time::sleep(self.op_delay).await;
        }
        self.inner.get(key).await
    }
}

#[async_trait]
impl BlockStore for InstrumentedStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        let now = self.puts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_puts.fetch_max(now, Ordering::SeqCst);
        let result = self.run_put(key, data).await;
        self.puts_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.put_count.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let now = self.gets_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_gets.fetch_max(now, Ordering::SeqCst);
        let result = self.run_get(key).await;
        self.gets_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.get_count.fetch_add(1, Ordering::SeqCst);
        result
    }
}
