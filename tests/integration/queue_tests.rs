//! Render queue integration tests.
//!
//! Tests verify:
//! - Duplicate requests share one render job and all receive its result
//! - High-priority work overtakes queued normal-priority work
//! - Document-scoped cancellation leaves other documents untouched
//! - Concurrent duplicate submissions never create two jobs
//! - Render failures surface as "no thumbnail" and stay retryable

use std::sync::Arc;
use std::time::Duration;

use pagethumb::{
    DocumentGuid, DocumentSource, JobState, Priority, Submission, ThumbOutcome, ThumbRequest,
};

use super::test_utils::{
    doc_source, page_thumb, start_queue, wait_until, CountingRasterizer, GatedRasterizer,
    RecordingSink, CORRUPT_PAGE,
};

fn request(sink: &Arc<RecordingSink>, guid: &str, page: u32, size: (u32, u32)) -> ThumbRequest {
    ThumbRequest::new(sink, doc_source(guid), guid, page, size)
}

// =============================================================================
// Deduplication and Priority
// =============================================================================

#[tokio::test]
async fn test_identical_normal_then_high_request_renders_once() {
    let dir = tempfile::tempdir().unwrap();
    let rasterizer = GatedRasterizer::closed();
    let queue = start_queue(dir.path(), rasterizer.clone(), 1);
    let filler = RecordingSink::new();

    // Hold the single render worker, then queue normal-priority work.
    queue
        .submit(&request(&filler, "other", 100, (120, 160)), Priority::Normal)
        .unwrap();
    wait_until(|| rasterizer.calls() == 1).await;
    for page in 101..104 {
        queue
            .submit(&request(&filler, "other", page, (120, 160)), Priority::Normal)
            .unwrap();
    }

    let first = RecordingSink::new();
    let second = RecordingSink::new();
    queue
        .submit(&request(&first, "doc1", 3, (120, 160)), Priority::Normal)
        .unwrap();
    queue
        .submit(&request(&second, "doc1", 3, (120, 160)), Priority::High)
        .unwrap();

    let jobs = queue.jobs_for(&DocumentGuid::new("doc1"));
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].listeners, 2);
    assert_eq!(jobs[0].priority, Priority::High);
    wait_until(|| queue.stats().queued_render == 4).await;

    rasterizer.open(10);
    wait_until(|| first.count() == 1 && second.count() == 1 && filler.count() == 4).await;

    assert_eq!(rasterizer.started_for("doc1"), 1);
    assert_eq!(first.deliveries()[0].outcome, second.deliveries()[0].outcome);
    assert_eq!(
        first.deliveries()[0].outcome,
        ThumbOutcome::Image(page_thumb(3, (120, 160)))
    );

    // Ran right after the job that held the worker.
    assert_eq!(rasterizer.finished_pages(), vec![100, 3, 101, 102, 103]);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_promote_reorders_queued_job() {
    let dir = tempfile::tempdir().unwrap();
    let rasterizer = GatedRasterizer::closed();
    let queue = start_queue(dir.path(), rasterizer.clone(), 1);
    let sink = RecordingSink::new();

    queue
        .submit(&request(&sink, "doc", 0, (8, 8)), Priority::Normal)
        .unwrap();
    wait_until(|| rasterizer.calls() == 1).await;

    let mut handles = Vec::new();
    for page in 1..=5 {
        match queue
            .submit(&request(&sink, "doc", page, (8, 8)), Priority::Normal)
            .unwrap()
        {
            Submission::Queued(handle) => handles.push(handle),
            Submission::Ready(_) => panic!("nothing should be cached yet"),
        }
    }
    wait_until(|| queue.stats().queued_render == 5).await;

    assert!(queue.promote(&handles[4]));
    assert!(queue.promote(&handles[2]));
    assert!(!queue.promote(&handles[2]));

    rasterizer.open(10);
    wait_until(|| sink.count() == 6).await;
    assert_eq!(rasterizer.finished_pages(), vec![0, 5, 3, 1, 2, 4]);
    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_create_one_job() {
    let dir = tempfile::tempdir().unwrap();
    let rasterizer = GatedRasterizer::closed();
    let queue = Arc::new(start_queue(dir.path(), rasterizer.clone(), 4));

    let mut tasks = Vec::new();
    let mut sinks = Vec::new();
    for i in 0..32 {
        let sink = RecordingSink::new();
        sinks.push(sink.clone());
        let queue = queue.clone();
        let priority = if i % 3 == 0 {
            Priority::High
        } else {
            Priority::Normal
        };
        tasks.push(tokio::spawn(async move {
            queue
                .submit(&request(&sink, "doc", 7, (64, 64)), priority)
                .unwrap()
        }));
    }
    for task in tasks {
        assert!(!task.await.unwrap().is_ready());
    }

    assert_eq!(queue.stats().jobs, 1);
    assert_eq!(queue.jobs_for(&DocumentGuid::new("doc"))[0].listeners, 32);

    rasterizer.open(1);
    wait_until(|| sinks.iter().all(|s| s.count() == 1)).await;
    assert_eq!(rasterizer.calls(), 1);
    assert_eq!(queue.stats().jobs, 0);

    let outcome = sinks[0].deliveries()[0].outcome.clone();
    assert!(sinks.iter().all(|s| s.deliveries()[0].outcome == outcome));
    queue.shutdown().await;
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_one_document_among_five() {
    let dir = tempfile::tempdir().unwrap();
    let rasterizer = GatedRasterizer::closed();
    let queue = start_queue(dir.path(), rasterizer.clone(), 2);
    let docs = ["doc1", "doc2", "doc3", "doc4", "doc5"];
    let sinks: Vec<Arc<RecordingSink>> = docs.iter().map(|_| RecordingSink::new()).collect();

    for page in 0..10 {
        for (doc, sink) in docs.iter().zip(&sinks) {
            queue
                .submit(&request(sink, doc, page, (16, 16)), Priority::Normal)
                .unwrap();
        }
    }
    wait_until(|| rasterizer.calls() == 2).await;
    wait_until(|| queue.stats().queued_fetch == 0).await;

    let doc3 = DocumentGuid::new("doc3");
    let running_before = rasterizer.started_for("doc3");
    assert_eq!(queue.cancel(&doc3), 10);

    // Nothing for doc3 remains queued; running jobs are marked cancelled.
    assert!(queue
        .jobs_for(&doc3)
        .iter()
        .all(|job| job.state == JobState::Cancelled));

    rasterizer.open(100);
    wait_until(|| queue.stats().jobs == 0).await;

    assert_eq!(rasterizer.started_for("doc3"), running_before);
    assert_eq!(sinks[2].count(), 0);
    for (i, sink) in sinks.iter().enumerate() {
        if i != 2 {
            assert_eq!(sink.count(), 10, "{}", docs[i]);
        }
    }
    assert!(queue.jobs_for(&doc3).is_empty());
    queue.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_running_job_still_fills_cache() {
    let dir = tempfile::tempdir().unwrap();
    let rasterizer = GatedRasterizer::closed();
    let queue = start_queue(dir.path(), rasterizer.clone(), 1);
    let sink = RecordingSink::new();
    let req = request(&sink, "doc", 2, (8, 8));

    queue.submit(&req, Priority::Normal).unwrap();
    wait_until(|| rasterizer.calls() == 1).await;
    assert_eq!(queue.cancel(&DocumentGuid::new("doc")), 1);

    rasterizer.open(1);
    wait_until(|| queue.stats().jobs == 0).await;

    assert_eq!(sink.count(), 0);
    assert!(queue.cache().lookup(req.cache_key()).await.is_hit());
    assert!(queue.submit(&req, Priority::Normal).unwrap().is_ready());
    queue.shutdown().await;
}

#[tokio::test]
async fn test_cancel_all_and_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let rasterizer = GatedRasterizer::closed();
    let queue = start_queue(dir.path(), rasterizer.clone(), 1);
    let sink = RecordingSink::new();

    for doc in ["a", "b", "c"] {
        for page in 0..3 {
            queue
                .submit(&request(&sink, doc, page, (8, 8)), Priority::Normal)
                .unwrap();
        }
    }
    wait_until(|| rasterizer.calls() == 1).await;

    assert_eq!(queue.cancel_all(), 9);
    let stats = queue.stats();
    assert_eq!(stats.queued_fetch + stats.queued_render, 0);
    assert_eq!(stats.jobs, stats.cancelled);

    rasterizer.open(1);
    queue.shutdown().await;
    assert_eq!(sink.count(), 0);
    assert_eq!(rasterizer.calls(), 1);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_render_failure_is_explicit_and_retryable() {
    let dir = tempfile::tempdir().unwrap();
    let rasterizer = CountingRasterizer::new();
    let queue = start_queue(dir.path(), rasterizer.clone(), 2);
    let sink = RecordingSink::new();
    let req = request(&sink, "doc", CORRUPT_PAGE, (8, 8));

    queue.submit(&req, Priority::High).unwrap();
    wait_until(|| sink.count() == 1).await;
    assert_eq!(sink.deliveries()[0].outcome, ThumbOutcome::NoThumbnail);
    assert!(!queue.cache().is_pending(req.cache_key()));
    assert_eq!(queue.cache().lookup(req.cache_key()).await, pagethumb::Lookup::Miss);

    queue.submit(&req, Priority::High).unwrap();
    wait_until(|| sink.count() == 2).await;
    assert_eq!(rasterizer.calls(), 2);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_bad_credential_delivers_no_thumbnail() {
    let dir = tempfile::tempdir().unwrap();
    let rasterizer = CountingRasterizer::locked("s3cret");
    let queue = start_queue(dir.path(), rasterizer.clone(), 1);
    let sink = RecordingSink::new();

    let wrong = ThumbRequest::new(
        &sink,
        DocumentSource::with_credential("/docs/locked.pdf", "guess"),
        "locked",
        0,
        (8, 8),
    );
    queue.submit(&wrong, Priority::Normal).unwrap();
    wait_until(|| sink.count() == 1).await;
    assert_eq!(sink.deliveries()[0].outcome, ThumbOutcome::NoThumbnail);

    let right = ThumbRequest::new(
        &sink,
        DocumentSource::with_credential("/docs/locked.pdf", "s3cret"),
        "locked",
        0,
        (8, 8),
    );
    queue.submit(&right, Priority::Normal).unwrap();
    wait_until(|| sink.count() == 2).await;
    assert!(sink.deliveries()[1].outcome.image().is_some());
    queue.shutdown().await;
}

// =============================================================================
// Throughput
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_render_tier_runs_in_parallel() {
    let dir = tempfile::tempdir().unwrap();
    let rasterizer = CountingRasterizer::with_delay(Duration::from_millis(100));
    let queue = start_queue(dir.path(), rasterizer.clone(), 4);
    let sink = RecordingSink::new();

    let start = std::time::Instant::now();
    for page in 0..8 {
        queue
            .submit(&request(&sink, "doc", page, (8, 8)), Priority::Normal)
            .unwrap();
    }
    wait_until(|| sink.count() == 8).await;

    // Serial rendering would take at least 800ms.
    assert!(start.elapsed() < Duration::from_millis(700));
    assert_eq!(rasterizer.calls(), 8);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_second_queue_hits_disk_without_rendering() {
    let dir = tempfile::tempdir().unwrap();
    let sink = RecordingSink::new();

    let first = CountingRasterizer::new();
    let queue = start_queue(dir.path(), first.clone(), 1);
    for page in 0..4 {
        queue
            .submit(&request(&sink, "doc", page, (8, 8)), Priority::Normal)
            .unwrap();
    }
    wait_until(|| sink.count() == 4).await;
    queue.shutdown().await;

    // Let the background persists finish.
    wait_until(|| {
        std::fs::read_dir(dir.path().join("doc"))
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| e.path().extension().is_some_and(|ext| ext == "png"))
                    .count()
                    == 4
            })
            .unwrap_or(false)
    })
    .await;

    let second = CountingRasterizer::new();
    let queue = start_queue(dir.path(), second.clone(), 1);
    for page in 0..4 {
        queue
            .submit(&request(&sink, "doc", page, (8, 8)), Priority::Normal)
            .unwrap();
    }
    wait_until(|| sink.count() == 8).await;
    assert_eq!(second.calls(), 0);
    queue.shutdown().await;
}
