//! # pagethumb
//!
//! Page thumbnail cache and asynchronous render scheduler for document
//! viewers.
//!
//! A thumbnail strip or page scrubber asks for many small page previews while
//! the user scrolls quickly, recycles display cells, and may close the
//! document mid-flight. This crate keeps those requests cheap and correct:
//!
//! ## Features
//!
//! - **Two-tier cache**: Byte-budgeted in-memory LRU in front of a warm,
//!   per-document on-disk cache that survives restarts
//! - **One job per thumbnail**: Duplicate requests attach to the job already
//!   in flight and all receive the same result
//! - **Two worker pools**: Disk lookups and CPU-bound rasterization are
//!   bounded independently
//! - **Priorities and cancellation**: Promote visible cells, cancel a closed
//!   document's work in one call
//! - **Stale-result protection**: Recycled cells never show a thumbnail for
//!   a page they no longer represent
//!
//! ## Architecture
//!
//! - [`cache`] - Memory and disk tiers, cache keys, PNG persistence
//! - [`queue`] - Requests, the rasterizer boundary, the two-tier scheduler
//! - [`view`] - The display-slot side of the request protocol
//! - [`document`] - Document identity and location
//! - [`config`] - Tunables and CLI types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use pagethumb::{
//!     DocumentSource, Priority, Rasterizer, RenderError, ThumbCache, ThumbConfig,
//!     ThumbDescriptor, ThumbQueue, ThumbView, Thumbnail,
//! };
//!
//! struct Blank;
//!
//! #[async_trait]
//! impl Rasterizer for Blank {
//!     async fn render(
//!         &self,
//!         _source: &DocumentSource,
//!         _page: u32,
//!         size: (u32, u32),
//!     ) -> Result<Thumbnail, RenderError> {
//!         Ok(Thumbnail::solid(size.0, size.1, [255, 255, 255, 255]))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ThumbConfig::default();
//!     let cache = Arc::new(ThumbCache::from_config("/tmp/pagethumb", &config));
//!     let queue = ThumbQueue::start(cache, Arc::new(Blank), &config).unwrap();
//!
//!     let cell = ThumbView::new();
//!     cell.show_page(
//!         &queue,
//!         DocumentSource::new("/docs/manual.pdf"),
//!         "manual-guid",
//!         ThumbDescriptor::new(0, 120, 160),
//!         Priority::High,
//!     )
//!     .unwrap();
//!
//!     queue.shutdown().await;
//! }
//! ```

pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod queue;
pub mod view;

// Re-export commonly used types
pub use cache::{
    CacheEntry, CacheKey, Lookup, RegionInfo, ThumbCache, ThumbDescriptor, Thumbnail,
    DEFAULT_MEMORY_BUDGET,
};
pub use config::{Cli, Command, ThumbConfig};
pub use document::{DocumentGuid, DocumentSource};
pub use error::{CacheError, DocumentError, QueueError, RenderError};
pub use queue::{
    fit_thumbnail, Delivery, JobInfo, JobState, Priority, QueueStats, Rasterizer, Submission,
    TargetTag, ThumbHandle, ThumbOutcome, ThumbQueue, ThumbRequest, ThumbSink, Tier,
};
pub use view::ThumbView;
