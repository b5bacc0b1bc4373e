//! Thumbnail cache.
//!
//! A process-scoped cache with a fast in-memory tier and a persistent on-disk
//! tier, scoped per document.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               ThumbQueue                │
//! └────────────────────┬────────────────────┘
//!                      │ lookup / mark_pending / store
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               ThumbCache                │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  MemoryTier  │  │  write-back     │  │
//! │  │  (LRU, byte  │  │  buffer         │  │
//! │  │   budget)    │  │                 │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ PNG files
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │       DiskTier (<root>/<guid>/...)      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`ThumbCache`]: Facade used by the queue and by document lifecycle code
//! - [`MemoryTier`]: LRU of decoded thumbnails with pending markers
//! - [`DiskTier`]: One directory per document, one PNG per thumbnail
//! - [`CacheKey`] / [`ThumbDescriptor`]: Identity of one thumbnail variant
//! - [`CacheEntry`]: `Image | Pending | Absent` state of a key
//!
//! # Example
//!
//! ```
//! use pagethumb::cache::{CacheKey, Lookup, ThumbCache, ThumbDescriptor, Thumbnail};
//!
//! #[tokio::main]
//! async fn main() {
//!     let dir = std::env::temp_dir().join("pagethumb-doc-example");
//!     let cache = ThumbCache::new(&dir);
//!
//!     let key = CacheKey::new("doc1", ThumbDescriptor::new(3, 120, 160));
//!     if cache.lookup(&key).await == Lookup::Miss {
//!         let thumb = Thumbnail::solid(120, 160, [255, 255, 255, 255]);
//!         cache.store(key.clone(), thumb).await.unwrap().unwrap();
//!     }
//!     assert!(cache.lookup(&key).await.is_hit());
//!
//!     cache.remove_region(&key.guid).await.unwrap();
//! }
//! ```

mod codec;
mod disk;
mod key;
mod memory;
mod store;

pub use codec::{decode_png, encode_png, Thumbnail};
pub use disk::{DiskTier, RegionInfo, DEFAULT_IO_RETRIES};
pub use key::{CacheKey, ThumbDescriptor};
pub use memory::{AlreadyPending, CacheEntry, MemoryTier, DEFAULT_MEMORY_BUDGET};
pub use store::{Lookup, ThumbCache};
