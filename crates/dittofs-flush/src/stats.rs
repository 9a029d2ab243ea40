//! Lock-free statistics for the flush engine.
//!
//! All counters are independent atomics accumulated from concurrent
//! workers; nothing on the hot path takes a lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the background uploader and synchronous flush paths.
#[derive(Debug, Default)]
pub struct UploaderStats {
    /// Tasks accepted onto the upload queue.
    pub enqueued: AtomicU64,
    /// Uploads that completed and were marked flushed.
    pub completed: AtomicU64,
    /// Uploads that failed (slice left dirty).
    pub failed: AtomicU64,
    /// Queue-full rejections that fell back to a synchronous upload.
    pub fallback_syncs: AtomicU64,
    /// Total payload bytes confirmed uploaded.
    pub bytes_uploaded: AtomicU64,
    /// Tasks currently queued, waiting to be claimed by a worker.
    pub queue_depth: AtomicU64,
}

impl UploaderStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_enqueue(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_claim(&self) {
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_complete(&self, bytes: u64) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_fallback(&self) {
        self.fallback_syncs.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough point-in-time copy for reporting.
    pub fn snapshot(&self) -> UploaderStatsSnapshot {
        UploaderStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            fallback_syncs: self.fallback_syncs.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`UploaderStats`] for logs and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploaderStatsSnapshot {
    /// Tasks accepted onto the upload queue.
    pub enqueued: u64,
    /// Uploads that completed and were marked flushed.
    pub completed: u64,
    /// Uploads that failed.
    pub failed: u64,
    /// Queue-full fallbacks to synchronous upload.
    pub fallback_syncs: u64,
    /// Total payload bytes confirmed uploaded.
    pub bytes_uploaded: u64,
    /// Tasks currently queued.
    pub queue_depth: u64,
}

/// Aggregate result of one startup recovery pass. Not persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Cached files enumerated.
    pub files_scanned: u64,
    /// Dirty slices found across all files.
    pub slices_found: u64,
    /// Slices uploaded and marked flushed.
    pub slices_uploaded: u64,
    /// Slices that failed to upload or be marked.
    pub slices_failed: u64,
    /// Payload bytes confirmed uploaded.
    pub bytes_uploaded: u64,
}

impl RecoveryStats {
    /// Whether the pass found nothing to do.
    pub fn is_clean(&self) -> bool {
        self.slices_found == 0 && self.slices_failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uploader_stats_accumulate() {
        let stats = UploaderStats::new();
        stats.record_enqueue();
        stats.record_enqueue();
        stats.record_claim();
        stats.record_complete(2000);
        stats.record_failure();
        stats.record_fallback();

        let snap = stats.snapshot();
        assert_eq!(snap.enqueued, 2);
        assert_eq!(snap.queue_depth, 1);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.bytes_uploaded, 2000);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.fallback_syncs, 1);
    }

    #[test]
    fn clean_recovery_stats() {
        let stats = RecoveryStats {
            files_scanned: 10,
            ..RecoveryStats::default()
        };
        assert!(stats.is_clean());
    }
}
