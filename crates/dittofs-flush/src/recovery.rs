//! Startup recovery of slices that survived an unclean shutdown.
//!
//! Runs once, before the server accepts protocol traffic. Any slice
//! still dirty in the cache was either never uploaded or was uploaded
//! but never confirmed - both look the same from here, and re-uploading
//! is safe because block keys are deterministic and marking is
//! idempotent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::FileHandle;
use crate::engine::EngineCore;
use crate::error::RecoveryError;
use crate::stats::RecoveryStats;

#[derive(Debug, Default)]
struct Counters {
    files_scanned: AtomicU64,
    slices_found: AtomicU64,
    slices_uploaded: AtomicU64,
    slices_failed: AtomicU64,
    bytes_uploaded: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> RecoveryStats {
        RecoveryStats {
            files_scanned: self.files_scanned.load(Ordering::Relaxed),
            slices_found: self.slices_found.load(Ordering::Relaxed),
            slices_uploaded: self.slices_uploaded.load(Ordering::Relaxed),
            slices_failed: self.slices_failed.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
        }
    }
}

/// Walks all cached files and re-uploads every unconfirmed slice.
pub struct RecoveryScanner {
    core: Arc<EngineCore>,
}

impl RecoveryScanner {
    pub(crate) fn new(core: Arc<EngineCore>) -> Self {
        Self { core }
    }

    /// Run one recovery pass.
    ///
    /// Upload tasks for all files share the engine's global upload
    /// limiter, so total in-flight uploads never exceed the configured
    /// bound regardless of how many files carry pending data. Individual
    /// failures are logged and counted but never abort the scan.
    ///
    /// Fails with [`RecoveryError::Partial`] if and only if at least one
    /// slice failed to upload or be marked; the returned stats are fully
    /// populated either way. Re-running is idempotent: a clean cache
    /// yields all-zero stats, and a partially failed pass re-attempts
    /// exactly the slices still dirty.
    pub async fn run(&self) -> Result<RecoveryStats, RecoveryError> {
        let started = Instant::now();
        let files = self.core.cache.list_files().await?;
        debug!(files = files.len(), "recovery scan started");

        let counters = Arc::new(Counters::default());
        let mut tasks: JoinSet<()> = JoinSet::new();

        for handle in files {
            counters.files_scanned.fetch_add(1, Ordering::Relaxed);
            self.scan_file(handle, &counters, &mut tasks).await;
        }

        while tasks.join_next().await.is_some() {}

        let stats = counters.snapshot();
        info!(
            files = stats.files_scanned,
            found = stats.slices_found,
            uploaded = stats.slices_uploaded,
            failed = stats.slices_failed,
            bytes = stats.bytes_uploaded,
            elapsed_ms = started.elapsed().as_millis(),
            "recovery scan finished"
        );

        if stats.slices_failed > 0 {
            Err(RecoveryError::Partial {
                failed: stats.slices_failed,
                stats,
            })
        } else {
            Ok(stats)
        }
    }

    /// Enumerate one file's dirty slices and schedule their uploads.
    async fn scan_file(
        &self,
        handle: FileHandle,
        counters: &Arc<Counters>,
        tasks: &mut JoinSet<()>,
    ) {
        let slices = match self.core.cache.dirty_slices(&handle).await {
            Ok(slices) => slices,
            Err(e) => {
                // The file's pending data is unreachable this pass; it
                // stays dirty and the error makes the pass report failure.
                warn!(handle = ?handle, error = %e, "failed to enumerate dirty slices");
                counters.slices_failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        if slices.is_empty() {
            return;
        }
        counters
            .slices_found
            .fetch_add(slices.len() as u64, Ordering::Relaxed);

        let content_id = match handle.content_id() {
            Ok(cid) => cid,
            Err(e) => {
                warn!(handle = ?handle, error = %e, "handle has no content identifier");
                counters
                    .slices_failed
                    .fetch_add(slices.len() as u64, Ordering::Relaxed);
                return;
            }
        };

        for slice in slices {
            let core = Arc::clone(&self.core);
            let counters = Arc::clone(counters);
            let handle = handle.clone();
            let content_id = content_id.clone();
            tasks.spawn(async move {
                let Ok(_permit) = Arc::clone(&core.upload_permits).acquire_owned().await else {
                    counters.slices_failed.fetch_add(1, Ordering::Relaxed);
                    return;
                };
                match core.upload_slice(&handle, &content_id, &slice).await {
                    Ok(bytes) => {
                        counters.slices_uploaded.fetch_add(1, Ordering::Relaxed);
                        counters.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
                    }
                    Err(e) => {
                        counters.slices_failed.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            %content_id,
                            slice = %slice.id,
                            error = %e,
                            "recovery upload failed; slice stays dirty"
                        );
                    }
                }
            });
        }
    }
}
