//! Bounded background upload pipeline.
//!
//! Decouples protocol commit latency from block-store upload latency. A
//! commit enqueues dirty slices onto a capacity-bounded queue and returns
//! immediately; a fixed pool of worker tasks claims queued uploads as
//! they become free to run them, each under a permit from the engine's
//! global upload limiter, so at most `parallel_uploads` slices are
//! uploading at any moment across background and foreground paths.
//!
//! # Backpressure
//!
//! `try_submit` never blocks. When the queue is full the task is handed
//! back to the caller, which is expected to perform a synchronous upload
//! instead - bounded memory over unbounded latency, and no dropped
//! writes under sustained overload.
//!
//! # Shutdown
//!
//! Shutdown stops accepting new tasks, cancels in-flight remote calls,
//! and waits for claimed tasks to wind down. Queued-but-unclaimed tasks
//! are abandoned; their slices remain dirty in the cache and the next
//! startup's recovery scan picks them up, preserving crash safety.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, Notify};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::cache::{ContentId, FileHandle, PendingSlice};
use crate::engine::EngineCore;

/// One slice scheduled for upload.
#[derive(Debug)]
pub(crate) struct UploadTask {
    pub handle: FileHandle,
    pub content_id: ContentId,
    pub slice: PendingSlice,
}

/// A task plus its in-flight registration; dropping the job (for any
/// reason) releases the registration so waiters are never stranded.
#[derive(Debug)]
pub(crate) struct UploadJob {
    pub task: UploadTask,
    guard: InFlightGuard,
}

impl UploadJob {
    pub fn new(task: UploadTask, guard: InFlightGuard) -> Self {
        Self { task, guard }
    }
}

/// Error handed back together with the rejected job.
#[derive(Debug, Error)]
pub(crate) enum SubmitError {
    /// Queue is at capacity; the caller should upload synchronously.
    #[error("upload queue full (capacity: {capacity})")]
    QueueFull { capacity: usize },
    /// The uploader is no longer accepting tasks.
    #[error("uploader has been shut down")]
    Shutdown,
}

#[derive(Debug, Default)]
struct InFlightCell {
    active: AtomicUsize,
    drained: Notify,
}

/// Tracks how many uploads are in flight per content identifier.
///
/// This is the only per-content synchronization in the engine: it gives
/// `wait_idle` its happens-before edge over a subsequent blocking flush
/// without any global lock.
#[derive(Debug, Default)]
pub(crate) struct InFlightRegistry {
    map: DashMap<ContentId, Arc<InFlightCell>>,
}

impl InFlightRegistry {
    /// Register one in-flight upload for `content_id`.
    ///
    /// The increment happens while the map entry is held, so a
    /// concurrent idle-cleanup can never observe the entry between
    /// insertion and increment.
    pub fn begin(self: &Arc<Self>, content_id: &ContentId) -> InFlightGuard {
        let entry = self.map.entry(content_id.clone()).or_default();
        entry.value().active.fetch_add(1, Ordering::AcqRel);
        let cell = Arc::clone(entry.value());
        drop(entry);
        InFlightGuard {
            registry: Arc::clone(self),
            content_id: content_id.clone(),
            cell,
        }
    }

    /// Wait until no upload for `content_id` is in flight.
    ///
    /// Returns immediately when nothing is registered.
    pub async fn wait_idle(&self, content_id: &ContentId) {
        loop {
            let cell = match self.map.get(content_id) {
                None => return,
                Some(entry) => Arc::clone(entry.value()),
            };
            let notified = cell.drained.notified();
            if cell.active.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Releases one in-flight registration on drop.
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    registry: Arc<InFlightRegistry>,
    content_id: ContentId,
    cell: Arc<InFlightCell>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.cell.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.cell.drained.notify_waiters();
            self.registry
                .map
                .remove_if(&self.content_id, |_, cell| {
                    cell.active.load(Ordering::Acquire) == 0
                });
        }
    }
}

/// The bounded queue + fixed worker pool that drains it.
pub(crate) struct BackgroundUploader {
    tx: mpsc::Sender<UploadJob>,
    accepting: AtomicBool,
    capacity: usize,
    registry: Arc<InFlightRegistry>,
    core: Arc<EngineCore>,
    tracker: TaskTracker,
}

impl BackgroundUploader {
    /// Start `workers` worker tasks draining a queue of `capacity`.
    /// Must be called within a Tokio runtime.
    ///
    /// A worker claims a task from the queue only when it is free to run
    /// it, so queue capacity is not silently extended by claimed-but-
    /// waiting work, and idle workers hold no upload permits that could
    /// starve the synchronous paths.
    pub fn spawn(core: Arc<EngineCore>, capacity: usize, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let tracker = TaskTracker::new();
        for worker_id in 0..workers {
            tracker.spawn(worker_loop(
                worker_id,
                Arc::clone(&rx),
                Arc::clone(&core),
            ));
        }
        debug!(capacity, workers, "background uploader started");
        Self {
            tx,
            accepting: AtomicBool::new(true),
            capacity,
            registry: Arc::new(InFlightRegistry::default()),
            core,
            tracker,
        }
    }

    /// The per-content in-flight registry.
    pub fn registry(&self) -> &Arc<InFlightRegistry> {
        &self.registry
    }

    /// Non-blocking enqueue.
    ///
    /// On rejection the job is handed back so the caller can fall back
    /// to a synchronous upload (queue full) or surface shutdown.
    pub fn try_submit(&self, job: UploadJob) -> Result<(), (SubmitError, UploadJob)> {
        if !self.accepting.load(Ordering::Acquire) || self.core.cancel.is_cancelled() {
            return Err((SubmitError::Shutdown, job));
        }
        match self.tx.try_send(job) {
            Ok(()) => {
                self.core.stats.record_enqueue();
                Ok(())
            }
            Err(TrySendError::Full(job)) => Err((
                SubmitError::QueueFull {
                    capacity: self.capacity,
                },
                job,
            )),
            Err(TrySendError::Closed(job)) => Err((SubmitError::Shutdown, job)),
        }
    }

    /// Graceful shutdown: refuse new work, cancel in-flight remote
    /// calls, and wait for claimed tasks to wind down. Abandoned queue
    /// entries stay dirty in the cache.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
        self.core.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("background uploader shut down");
    }
}

/// Worker main loop: claim, acquire an upload permit, upload, repeat.
async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<UploadJob>>>,
    core: Arc<EngineCore>,
) {
    debug!(worker_id, "upload worker started");
    loop {
        let job = {
            let mut rx = tokio::select! {
                () = core.cancel.cancelled() => break,
                guard = rx.lock() => guard,
            };
            tokio::select! {
                () = core.cancel.cancelled() => break,
                maybe = rx.recv() => match maybe {
                    Some(job) => job,
                    None => break,
                },
            }
        };
        core.stats.record_claim();

        // The permit is what bounds in-flight uploads globally; recovery
        // and the synchronous paths draw from the same pool.
        let _permit = tokio::select! {
            () = core.cancel.cancelled() => break,
            res = Arc::clone(&core.upload_permits).acquire_owned() => match res {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let UploadJob { task, guard: _guard } = job;
        match core
            .upload_slice(&task.handle, &task.content_id, &task.slice)
            .await
        {
            Ok(bytes) => core.stats.record_complete(bytes),
            Err(e) => {
                core.stats.record_failure();
                warn!(
                    worker_id,
                    content_id = %task.content_id,
                    slice = %task.slice.id,
                    error = %e,
                    "background upload failed; slice stays dirty for retry"
                );
            }
        }
    }
    debug!(worker_id, "upload worker exiting");
}
