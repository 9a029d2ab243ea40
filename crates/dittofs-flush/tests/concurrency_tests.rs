//! At-most-bound concurrency and read fan-out behavior.
//!
//! The instrumented store records the peak number of overlapping put/get
//! calls; these tests drive far more pending work than the configured
//! bounds and assert the peaks never exceed them.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{engine_with, wait_until};
use dittofs_flush::testing::{patterned, InstrumentedStore};
use dittofs_flush::{ContentId, FlushConfig, FlushError, BLOCK_SIZE};
use dittofs_store::MemoryBlockStore;

fn delayed_engine(config: FlushConfig, delay: Duration) -> common::TestEngine {
    let backing = Arc::new(MemoryBlockStore::new());
    let store = Arc::new(InstrumentedStore::wrap(backing.clone()).with_op_delay(delay));
    engine_with(config, backing, store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn background_uploads_never_exceed_configured_bound() {
    let t = delayed_engine(
        FlushConfig::default().with_parallel_uploads(3),
        Duration::from_millis(5),
    );

    // Ten files, five single-block slices each: far more pending work
    // than the bound.
    let mut files = Vec::new();
    for f in 0..10u64 {
        let name = format!("export/file-{f}.bin");
        let handle = t.cache.open(&name);
        for chunk in 0..5u64 {
            // Truncation is fine: small test values.
            #[allow(clippy::cast_possible_truncation)]
            t.cache
                .write_slice(&handle, chunk, 0, patterned(1000, (f * 5 + chunk) as u8));
        }
        files.push((handle, ContentId::from(name.as_str())));
    }

    for (handle, cid) in &files {
        t.flusher
            .flush_remaining_async("export", handle, cid)
            .await
            .unwrap();
    }
    for (_, cid) in &files {
        t.flusher.wait_for_uploads(cid).await.unwrap();
    }

    assert_eq!(t.flusher.stats().completed, 50);
    assert!(
        t.store.peak_puts() <= 3,
        "peak concurrent puts {} exceeded bound 3",
        t.store.peak_puts()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recovery_shares_the_global_upload_bound() {
    let t = delayed_engine(
        FlushConfig::default().with_parallel_uploads(2),
        Duration::from_millis(5),
    );

    for f in 0..6u64 {
        let handle = t.cache.open(&format!("export/r-{f}.bin"));
        for chunk in 0..5u64 {
            #[allow(clippy::cast_possible_truncation)]
            t.cache
                .write_slice(&handle, chunk, 0, patterned(800, (f + chunk) as u8));
        }
    }

    let stats = t.flusher.recover().await.unwrap();
    assert_eq!(stats.slices_uploaded, 30);
    assert!(
        t.store.peak_puts() <= 2,
        "peak concurrent puts {} exceeded bound 2",
        t.store.peak_puts()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reads_never_exceed_download_bound() {
    let t = delayed_engine(
        FlushConfig::default().with_parallel_downloads(2),
        Duration::from_millis(5),
    );

    // Populate four files of three blocks each via recovery.
    let total = 3 * BLOCK_SIZE;
    for f in 0..4u64 {
        let handle = t.cache.open(&format!("export/d-{f}.bin"));
        for b in 0..3u64 {
            #[allow(clippy::cast_possible_truncation)]
            t.cache
                .write_slice(&handle, 0, b * BLOCK_SIZE, patterned(BLOCK_SIZE as usize, f as u8));
        }
    }
    t.flusher.recover().await.unwrap();
    t.store.reset_counters();

    let mut reads = Vec::new();
    for f in 0..4u64 {
        let flusher = Arc::clone(&t.flusher);
        reads.push(tokio::spawn(async move {
            let cid = ContentId::from(format!("export/d-{f}.bin").as_str());
            flusher.read_blocks("export", &cid, 0, 0, total).await
        }));
    }
    for read in reads {
        let data = read.await.unwrap().unwrap();
        assert_eq!(data.len() as u64, total);
    }

    assert!(
        t.store.peak_gets() <= 2,
        "peak concurrent gets {} exceeded bound 2",
        t.store.peak_gets()
    );
}

#[tokio::test]
async fn read_fetches_exactly_the_spanning_blocks() {
    let t = delayed_engine(FlushConfig::default(), Duration::ZERO);
    let cid = ContentId::from("export/span.bin");
    let handle = t.cache.open("export/span.bin");

    // Three full blocks plus a 1 MiB partial.
    let mut original = Vec::new();
    for b in 0..3u64 {
        #[allow(clippy::cast_possible_truncation)]
        let block = patterned(BLOCK_SIZE as usize, 20 + b as u8);
        original.extend_from_slice(&block);
        t.cache.write_slice(&handle, 0, b * BLOCK_SIZE, block);
    }
    let partial = patterned(1024 * 1024, 99);
    original.extend_from_slice(&partial);
    t.cache.write_slice(&handle, 0, 3 * BLOCK_SIZE, partial);
    t.flusher.recover().await.unwrap();

    // A range inside blocks 1-2 touches exactly those two blocks.
    t.store.reset_counters();
    let offset = BLOCK_SIZE + 10;
    let read = t
        .flusher
        .read_blocks("export", &cid, 0, offset, BLOCK_SIZE)
        .await
        .unwrap();
    assert_eq!(t.store.get_count(), 2);
    #[allow(clippy::cast_possible_truncation)]
    let expected = &original[offset as usize..(offset + BLOCK_SIZE) as usize];
    assert_eq!(read.as_ref(), expected);

    // A range crossing into the partial block reads through to
    // end-of-file and touches only blocks 2 and 3.
    t.store.reset_counters();
    let total = original.len() as u64;
    let offset = 2 * BLOCK_SIZE + 100;
    let read = t
        .flusher
        .read_blocks("export", &cid, 0, offset, total - offset)
        .await
        .unwrap();
    assert_eq!(t.store.get_count(), 2);
    #[allow(clippy::cast_possible_truncation)]
    let expected = &original[offset as usize..];
    assert_eq!(read.as_ref(), expected);

    // Reading the partial block alone returns just its bytes.
    t.store.reset_counters();
    let read = t
        .flusher
        .read_blocks("export", &cid, 0, 3 * BLOCK_SIZE, BLOCK_SIZE)
        .await
        .unwrap();
    assert_eq!(t.store.get_count(), 1);
    assert_eq!(read.len(), 1024 * 1024);
}

#[tokio::test]
async fn read_of_missing_leading_block_is_not_found() {
    let t = delayed_engine(FlushConfig::default(), Duration::ZERO);
    let cid = ContentId::from("export/absent.bin");

    let err = t
        .flusher
        .read_blocks("export", &cid, 0, 0, 100)
        .await
        .unwrap_err();
    let FlushError::Store(store_err) = err else {
        panic!("expected store error");
    };
    assert!(store_err.is_not_found());
}

#[tokio::test]
async fn zero_length_read_is_empty_without_fetching() {
    let t = delayed_engine(FlushConfig::default(), Duration::ZERO);
    let cid = ContentId::from("export/zero.bin");

    let read = t.flusher.read_blocks("export", &cid, 0, 0, 0).await.unwrap();
    assert!(read.is_empty());
    assert_eq!(t.store.get_count(), 0);
}

#[tokio::test]
async fn read_entirely_past_end_of_file_is_empty() {
    let t = delayed_engine(FlushConfig::default(), Duration::ZERO);
    let cid = ContentId::from("export/short.bin");
    let handle = t.cache.open("export/short.bin");
    t.cache.write_slice(&handle, 0, 0, patterned(1000, 1));
    t.flusher.recover().await.unwrap();

    // Block 0 exists but holds only 1000 bytes; an offset past that
    // still within block 0 yields an empty result, not an error.
    let read = t
        .flusher
        .read_blocks("export", &cid, 0, 2000, 100)
        .await
        .unwrap();
    assert!(read.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_drains_claimed_uploads() {
    let t = delayed_engine(
        FlushConfig::default().with_parallel_uploads(2),
        Duration::from_millis(10),
    );
    let cid = ContentId::from("export/drain.bin");
    let handle = t.cache.open("export/drain.bin");
    for chunk in 0..8u64 {
        #[allow(clippy::cast_possible_truncation)]
        t.cache
            .write_slice(&handle, chunk, 0, patterned(500, chunk as u8));
    }

    t.flusher
        .flush_remaining_async("export", &handle, &cid)
        .await
        .unwrap();
    wait_until("first uploads to start", || t.store.peak_puts() >= 1).await;
    t.flusher.shutdown().await;

    // Whatever was not confirmed flushed is still dirty for the next
    // recovery pass; nothing is both flushed and dirty, nothing is lost.
    let stats = t.flusher.stats();
    assert_eq!(
        stats.completed + t.cache.dirty_count(&handle) as u64,
        8,
        "every slice is either confirmed flushed or still dirty"
    );
}
