//! Display-slot reuse tests.
//!
//! Tests verify:
//! - A slot reassigned before delivery never shows the old page
//! - Rapid reassignment settles on the last page
//! - A raw sink that never releases still sees stale deliveries tagged for
//!   the old request, so tag comparison alone rejects them
//! - Clearing a slot for reuse drops its outstanding work

use std::sync::Arc;

use pagethumb::{Priority, TargetTag, ThumbDescriptor, ThumbRequest, ThumbView};

use super::test_utils::{
    doc_source, page_thumb, start_queue, wait_until, CountingRasterizer, GatedRasterizer,
    RecordingSink,
};

#[tokio::test]
async fn test_reassigned_slot_never_shows_old_page() {
    let dir = tempfile::tempdir().unwrap();
    let rasterizer = GatedRasterizer::closed();
    let queue = start_queue(dir.path(), rasterizer.clone(), 1);
    let view = ThumbView::new();

    view.show_page(
        &queue,
        doc_source("doc"),
        "doc",
        ThumbDescriptor::new(1, 100, 100),
        Priority::High,
    )
    .unwrap();
    wait_until(|| rasterizer.calls() == 1).await;

    view.show_page(
        &queue,
        doc_source("doc"),
        "doc",
        ThumbDescriptor::new(2, 100, 100),
        Priority::High,
    )
    .unwrap();
    assert!(view.image().is_none());

    // Page 1 finishes first; the slot must stay empty.
    rasterizer.open(1);
    wait_until(|| rasterizer.finished_pages() == vec![1]).await;
    assert_ne!(view.image(), Some(page_thumb(1, (100, 100))));

    rasterizer.open(1);
    wait_until(|| view.image().is_some()).await;
    assert_eq!(view.image(), Some(page_thumb(2, (100, 100))));
    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rapid_reassignment_settles_on_last_page() {
    let dir = tempfile::tempdir().unwrap();
    let rasterizer = CountingRasterizer::new();
    let queue = start_queue(dir.path(), rasterizer.clone(), 4);
    let views: Vec<Arc<ThumbView>> = (0..4).map(|_| ThumbView::new()).collect();

    // Scroll 40 pages through 4 recycled cells.
    for page in 0..40u32 {
        let view = &views[(page % 4) as usize];
        view.show_page(
            &queue,
            doc_source("doc"),
            "doc",
            ThumbDescriptor::new(page, 32, 32),
            Priority::Normal,
        )
        .unwrap();
    }

    wait_until(|| views.iter().all(|v| v.image().is_some())).await;
    for (cell, view) in views.iter().enumerate() {
        let last_page = 36 + cell as u32;
        assert_eq!(view.image(), Some(page_thumb(last_page, (32, 32))));
    }
    queue.shutdown().await;
}

#[tokio::test]
async fn test_unreleased_listener_gets_tag_of_old_request() {
    let dir = tempfile::tempdir().unwrap();
    let rasterizer = GatedRasterizer::closed();
    let queue = start_queue(dir.path(), rasterizer.clone(), 1);
    let sink = RecordingSink::new();

    let page1 = ThumbRequest::new(&sink, doc_source("doc"), "doc", 1, (100, 100));
    let page2 = ThumbRequest::new(&sink, doc_source("doc"), "doc", 2, (100, 100));
    queue.submit(&page1, Priority::Normal).unwrap();
    queue.submit(&page2, Priority::Normal).unwrap();

    rasterizer.open(2);
    wait_until(|| sink.count() == 2).await;

    let current = page2.target_tag();
    let accepted: Vec<_> = sink
        .deliveries()
        .into_iter()
        .filter(|d| d.target_tag == current)
        .collect();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].key, *page2.cache_key());
    assert_ne!(page1.target_tag(), current);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_clear_for_reuse_releases_queued_work() {
    let dir = tempfile::tempdir().unwrap();
    let rasterizer = GatedRasterizer::closed();
    let queue = start_queue(dir.path(), rasterizer.clone(), 1);
    let busy = ThumbView::new();
    let view = ThumbView::new();

    busy.show_page(
        &queue,
        doc_source("doc"),
        "doc",
        ThumbDescriptor::new(0, 16, 16),
        Priority::Normal,
    )
    .unwrap();
    wait_until(|| rasterizer.calls() == 1).await;

    view.show_page(
        &queue,
        doc_source("doc"),
        "doc",
        ThumbDescriptor::new(5, 16, 16),
        Priority::Normal,
    )
    .unwrap();
    wait_until(|| queue.stats().queued_render == 1).await;

    view.clear_for_reuse(&queue);
    assert_eq!(view.target_tag(), TargetTag::EMPTY);
    assert!(!view.is_waiting());
    assert_eq!(queue.stats().queued_render, 0);

    rasterizer.open(1);
    wait_until(|| busy.image().is_some()).await;
    assert!(view.image().is_none());
    assert_eq!(rasterizer.calls(), 1);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_promote_from_view() {
    let dir = tempfile::tempdir().unwrap();
    let rasterizer = GatedRasterizer::closed();
    let queue = start_queue(dir.path(), rasterizer.clone(), 1);
    let views: Vec<Arc<ThumbView>> = (0..4).map(|_| ThumbView::new()).collect();

    for (page, view) in views.iter().enumerate() {
        view.show_page(
            &queue,
            doc_source("doc"),
            "doc",
            ThumbDescriptor::new(page as u32, 16, 16),
            Priority::Normal,
        )
        .unwrap();
    }
    wait_until(|| rasterizer.calls() == 1 && queue.stats().queued_render == 3).await;

    // The user scrolled to the last cell.
    assert!(views[3].promote(&queue));

    rasterizer.open(4);
    wait_until(|| views.iter().all(|v| v.image().is_some())).await;
    assert_eq!(rasterizer.finished_pages(), vec![0, 3, 1, 2]);
    queue.shutdown().await;
}
