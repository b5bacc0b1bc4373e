//! Test utilities for integration tests.
//!
//! Mock rasterizers with call tracking, a recording display sink, and
//! helpers for starting an isolated queue over a temporary cache root.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use pagethumb::{
    Delivery, DocumentSource, Rasterizer, RenderError, ThumbCache, ThumbConfig, ThumbQueue,
    ThumbSink, Thumbnail,
};

/// Page number that every mock rasterizer fails to render.
pub const CORRUPT_PAGE: u32 = 999;

/// Deterministic thumbnail content for a page.
pub fn page_thumb(page: u32, size: (u32, u32)) -> Thumbnail {
    Thumbnail::solid(size.0, size.1, [(page % 256) as u8, (page / 256) as u8, 0x40, 0xFF])
}

/// Location used for a document in tests; mock rasterizers record it.
pub fn doc_path(guid: &str) -> PathBuf {
    PathBuf::from(format!("/docs/{}.pdf", guid))
}

pub fn doc_source(guid: &str) -> DocumentSource {
    DocumentSource::new(doc_path(guid))
}

// =============================================================================
// Gated Rasterizer
// =============================================================================

/// A rasterizer that blocks every render until a permit is released.
///
/// Records each call on entry and each completed render in order, so tests
/// can hold render workers busy and observe scheduling order.
pub struct GatedRasterizer {
    gate: Semaphore,
    calls: AtomicUsize,
    started: Mutex<Vec<(PathBuf, u32)>>,
    finished: Mutex<Vec<(PathBuf, u32)>>,
}

impl GatedRasterizer {
    /// A rasterizer that renders nothing until [`open`](Self::open) is called.
    pub fn closed() -> Arc<Self> {
        Self::with_permits(0)
    }

    pub fn with_permits(permits: usize) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(permits),
            calls: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
        })
    }

    /// Let `permits` more renders complete.
    pub fn open(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Renders started for one document.
    pub fn started_for(&self, guid: &str) -> usize {
        let path = doc_path(guid);
        self.started
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == path)
            .count()
    }

    /// Pages in the order their render completed.
    pub fn finished_pages(&self) -> Vec<u32> {
        self.finished
            .lock()
            .unwrap()
            .iter()
            .map(|(_, page)| *page)
            .collect()
    }
}

#[async_trait]
impl Rasterizer for GatedRasterizer {
    async fn render(
        &self,
        source: &DocumentSource,
        page: u32,
        size: (u32, u32),
    ) -> Result<Thumbnail, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started
            .lock()
            .unwrap()
            .push((source.path.clone(), page));

        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| RenderError::Unreadable(e.to_string()))?;
        permit.forget();

        self.finished
            .lock()
            .unwrap()
            .push((source.path.clone(), page));

        if page == CORRUPT_PAGE {
            return Err(RenderError::Corrupt("broken content stream".to_string()));
        }
        Ok(page_thumb(page, size))
    }
}

// =============================================================================
// Counting Rasterizer
// =============================================================================

/// A rasterizer that renders immediately (after an optional delay) and
/// counts calls.
pub struct CountingRasterizer {
    calls: AtomicUsize,
    delay: Duration,
    password: Option<String>,
}

impl CountingRasterizer {
    pub fn new() -> Arc<Self> {
        Self::build(Duration::ZERO, None)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Self::build(delay, None)
    }

    /// Renders only documents opened with `password`.
    pub fn locked(password: &str) -> Arc<Self> {
        Self::build(Duration::ZERO, Some(password.to_string()))
    }

    fn build(delay: Duration, password: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            password,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Rasterizer for CountingRasterizer {
    async fn render(
        &self,
        source: &DocumentSource,
        page: u32,
        size: (u32, u32),
    ) -> Result<Thumbnail, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.password.is_some() && source.credential != self.password {
            return Err(RenderError::BadCredential);
        }
        if page == CORRUPT_PAGE {
            return Err(RenderError::Corrupt("broken content stream".to_string()));
        }
        Ok(page_thumb(page, size))
    }
}

// =============================================================================
// Recording Sink
// =============================================================================

/// A display slot that records every delivery it receives.
#[derive(Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

impl ThumbSink for RecordingSink {
    fn deliver(&self, delivery: Delivery) {
        self.deliveries.lock().unwrap().push(delivery);
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Start a queue with one fetch worker (so render-queue order follows
/// submission order) over a fresh cache at `root`.
pub fn start_queue(root: &Path, rasterizer: Arc<dyn Rasterizer>, render_workers: usize) -> ThumbQueue {
    let config = ThumbConfig::default()
        .with_fetch_workers(1)
        .with_render_workers(render_workers);
    let cache = Arc::new(ThumbCache::from_config(root, &config));
    ThumbQueue::start(cache, rasterizer, &config).unwrap()
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}
