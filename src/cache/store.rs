//! Two-tier thumbnail cache.
//!
//! [`ThumbCache`] combines the byte-budgeted [`MemoryTier`] with the
//! persistent [`DiskTier`]:
//!
//! ```text
//! lookup ──▶ memory ──▶ write-back buffer ──▶ disk ──▶ Miss
//!              ▲                                │
//!              └──────── promote on hit ────────┘
//!
//! store  ──▶ memory (now) + write-back buffer ──▶ disk (background)
//! ```
//!
//! The write-back buffer holds thumbnails whose disk write has not finished
//! yet. A `store` is therefore visible to every later `lookup` even when the
//! memory tier evicts it before it reaches disk.
//!
//! Removal drops buffered entries before taking the region lock, and a
//! background write only proceeds while its entry is still buffered, so a
//! removed thumbnail never comes back from a late write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::codec::Thumbnail;
use super::disk::{DiskTier, RegionInfo};
use super::key::CacheKey;
use super::memory::{AlreadyPending, CacheEntry, MemoryTier};
use crate::config::ThumbConfig;
use crate::document::DocumentGuid;
use crate::error::CacheError;

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hit(Thumbnail),
    Miss,
}

impl Lookup {
    pub fn into_option(self) -> Option<Thumbnail> {
        match self {
            Lookup::Hit(thumb) => Some(thumb),
            Lookup::Miss => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// Thumbnails stored but not yet persisted, tagged with a write sequence so
/// an older write finishing late does not drop a newer entry.
type WriteBack = Mutex<HashMap<CacheKey, (u64, Thumbnail)>>;

/// Process-scoped thumbnail cache shared by the queue and its consumers.
///
/// Construct one per cache root and share it via `Arc`.
pub struct ThumbCache {
    memory: MemoryTier,
    disk: Arc<DiskTier>,
    write_back: Arc<WriteBack>,
    write_seq: AtomicU64,
}

impl ThumbCache {
    /// Create a cache with default settings rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from_config(root, &ThumbConfig::default())
    }

    /// Create a cache using the memory budget and retry policy of `config`.
    pub fn from_config(root: impl Into<PathBuf>, config: &ThumbConfig) -> Self {
        Self {
            memory: MemoryTier::with_capacity(config.memory_budget_bytes),
            disk: Arc::new(DiskTier::with_retries(root, config.io_retries)),
            write_back: Arc::new(Mutex::new(HashMap::new())),
            write_seq: AtomicU64::new(0),
        }
    }

    fn write_back_get(&self, key: &CacheKey) -> Option<Thumbnail> {
        self.write_back
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|(_, thumb)| thumb.clone())
    }

    fn write_back_forget(&self, matches: impl Fn(&CacheKey) -> bool) {
        forget_buffered(&self.write_back, matches);
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Non-blocking probe of the in-memory state.
    ///
    /// Never touches disk; safe on a UI-driving thread.
    pub fn lookup_memory(&self, key: &CacheKey) -> Option<Thumbnail> {
        self.memory.get(key).or_else(|| self.write_back_get(key))
    }

    /// Resolve a key to a thumbnail, checking memory first and then disk.
    ///
    /// A disk hit is decoded and promoted into the memory tier. Disk errors
    /// are never surfaced: transient failures are retried by the disk tier,
    /// then reported as a miss; corrupt files are deleted and reported as a
    /// miss.
    pub async fn lookup(&self, key: &CacheKey) -> Lookup {
        if let Some(thumb) = self.lookup_memory(key) {
            debug!(%key, "memory hit");
            return Lookup::Hit(thumb);
        }

        match self.disk.load(key).await {
            Ok(Some(thumb)) => {
                debug!(%key, "disk hit");
                self.memory.promote(key.clone(), thumb.clone());
                Lookup::Hit(thumb)
            }
            Ok(None) => {
                debug!(%key, "miss");
                Lookup::Miss
            }
            Err(e) => {
                warn!(%key, error = %e, "disk lookup failed, treating as miss");
                Lookup::Miss
            }
        }
    }

    /// Classify a key: resident image, pending render, or untracked.
    pub fn entry(&self, key: &CacheKey) -> CacheEntry {
        match self.memory.entry(key) {
            CacheEntry::Image(thumb) => CacheEntry::Image(thumb),
            other => match self.write_back_get(key) {
                Some(thumb) => CacheEntry::Image(thumb),
                None => other,
            },
        }
    }

    // =========================================================================
    // Pending Markers
    // =========================================================================

    /// Record that a render job for `key` is in flight.
    ///
    /// Fails if a marker already exists; the caller should attach to the
    /// existing job instead of starting another.
    pub fn mark_pending(&self, key: &CacheKey) -> Result<(), AlreadyPending> {
        self.memory.mark_pending(key)
    }

    /// Remove a pending marker without storing anything, so a later request
    /// may retry.
    pub fn clear_pending(&self, key: &CacheKey) -> bool {
        self.memory.clear_pending(key)
    }

    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.memory.is_pending(key)
    }

    // =========================================================================
    // Store / Remove
    // =========================================================================

    /// Store a thumbnail.
    ///
    /// The memory tier is updated (and the pending marker cleared) before this
    /// returns; the disk write runs in the background. The returned handle
    /// resolves once the thumbnail is persisted.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn store(&self, key: CacheKey, thumb: Thumbnail) -> JoinHandle<Result<(), CacheError>> {
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        self.write_back
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), (seq, thumb.clone()));

        let evicted = self.memory.put(key.clone(), thumb.clone());
        if evicted > 0 {
            debug!(%key, evicted, "memory tier evicted entries");
        }

        let disk = self.disk.clone();
        let write_back = self.write_back.clone();
        tokio::spawn(async move {
            let buffered = || {
                write_back
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(&key)
                    .is_some_and(|(s, _)| *s == seq)
            };
            let result = disk.save_if(&key, &thumb, buffered).await;
            if let Err(ref e) = result {
                warn!(%key, error = %e, "failed to persist thumbnail");
            }

            let mut buffer = write_back.lock().unwrap_or_else(|e| e.into_inner());
            if buffer.get(&key).is_some_and(|(s, _)| *s == seq) {
                buffer.remove(&key);
            }
            result.map(|_| ())
        })
    }

    /// Remove one thumbnail from both tiers.
    pub async fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.write_back_forget(|k| k == key);
        self.memory.remove(key);
        self.disk.delete(key).await.map(|_| ())
    }

    /// Drop every thumbnail from the memory tier (memory pressure).
    pub fn clear_memory(&self) {
        self.memory.clear();
    }

    // =========================================================================
    // Regions
    // =========================================================================

    /// Mark a document's region as recently used.
    pub async fn touch(&self, guid: &DocumentGuid) -> Result<(), CacheError> {
        self.disk.touch(guid).await
    }

    /// Create a document's region. Idempotent.
    pub async fn create_region(&self, guid: &DocumentGuid) -> Result<(), CacheError> {
        self.disk.create_region(guid).await
    }

    /// Delete a document's region and drop its thumbnails from memory.
    /// Idempotent.
    pub async fn remove_region(&self, guid: &DocumentGuid) -> Result<bool, CacheError> {
        self.write_back_forget(|k| &k.guid == guid);
        self.memory.remove_document(guid);
        self.disk.remove_region(guid).await
    }

    /// Delete every region untouched for longer than `age`.
    ///
    /// Returns the GUIDs whose regions were removed.
    pub async fn purge_older_than(&self, age: Duration) -> Result<Vec<String>, CacheError> {
        let write_back = &self.write_back;
        let memory = &self.memory;
        self.disk
            .purge_older_than_with(age, |guid| {
                forget_buffered(write_back, |k| &k.guid == guid);
                memory.remove_document(guid);
            })
            .await
    }

    /// Directory of a document's region.
    pub fn path_for(&self, guid: &DocumentGuid) -> PathBuf {
        self.disk.path_for(guid)
    }

    pub fn root(&self) -> &Path {
        self.disk.root()
    }

    /// Describe every on-disk region.
    pub async fn regions(&self) -> Result<Vec<RegionInfo>, CacheError> {
        self.disk.regions().await
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// Bytes currently charged against the memory budget.
    pub fn memory_size(&self) -> usize {
        self.memory.size()
    }

    /// Number of thumbnails resident in memory.
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn memory_capacity(&self) -> usize {
        self.memory.capacity()
    }
}

fn forget_buffered(write_back: &WriteBack, matches: impl Fn(&CacheKey) -> bool) {
    write_back
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .retain(|key, _| !matches(key));
}

// =============================================================================
// Tests
// =============================================================================
