//! In-memory thumbnail tier.
//!
//! An LRU of decoded thumbnails bounded by total byte cost, plus the set of
//! pending markers for keys that have a render job in flight.
//!
//! # Size-Based Eviction
//!
//! The tier tracks the summed [`Thumbnail::cost`] of its entries and evicts
//! least-recently-used entries until it is back within budget. Recency is
//! updated by every [`get`](MemoryTier::get) and [`put`](MemoryTier::put),
//! so eviction never drops an entry accessed more recently than one it keeps.
//!
//! # Locking
//!
//! All state sits behind one `std::sync::Mutex`. Critical sections are a
//! handful of hash operations and never perform I/O, so the tier is safe to
//! call from a UI-driving thread as well as from workers.

use std::collections::HashSet;
use std::sync::Mutex;

use lru::LruCache;

use super::codec::Thumbnail;
use super::key::CacheKey;
use crate::document::DocumentGuid;

/// Default memory budget: 25MB
pub const DEFAULT_MEMORY_BUDGET: usize = 25 * 1024 * 1024;

/// State of one key as seen by the memory tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    /// A decoded thumbnail is resident
    Image(Thumbnail),

    /// A render job for this key is in flight
    Pending,

    /// Nothing is tracked for this key
    Absent,
}

/// Returned by [`MemoryTier::mark_pending`] when a marker already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyPending;

struct Inner {
    images: LruCache<CacheKey, Thumbnail>,
    pending: HashSet<CacheKey>,
    current_size: usize,
}

/// Byte-budgeted LRU of thumbnails with pending markers.
pub struct MemoryTier {
    inner: Mutex<Inner>,
    max_size: usize,
}

impl MemoryTier {
    /// Create a tier with the default budget (25MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_BUDGET)
    }

    /// Create a tier with the given budget in bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                images: LruCache::unbounded(),
                pending: HashSet::new(),
                current_size: 0,
            }),
            max_size,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // No operation leaves Inner inconsistent across a panic point.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get a thumbnail, marking it as most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Thumbnail> {
        self.lock().images.get(key).cloned()
    }

    /// Check residency without touching recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().images.contains(key)
    }

    /// Insert a thumbnail and clear any pending marker for its key.
    ///
    /// Returns the number of entries evicted to get back under budget.
    pub fn put(&self, key: CacheKey, thumb: Thumbnail) -> usize {
        self.insert(key, thumb, true)
    }

    /// Insert a thumbnail loaded from disk, leaving pending markers alone.
    pub fn promote(&self, key: CacheKey, thumb: Thumbnail) -> usize {
        self.insert(key, thumb, false)
    }

    fn insert(&self, key: CacheKey, thumb: Thumbnail, clear_pending: bool) -> usize {
        let mut inner = self.lock();
        let cost = thumb.cost();

        if clear_pending {
            inner.pending.remove(&key);
        }

        if let Some(old) = inner.images.peek(&key) {
            let old_cost = old.cost();
            inner.current_size = inner.current_size.saturating_sub(old_cost);
        }

        inner.images.put(key, thumb);
        inner.current_size += cost;

        let mut evicted = 0;
        while inner.current_size > self.max_size {
            match inner.images.pop_lru() {
                Some((_, old)) => {
                    inner.current_size = inner.current_size.saturating_sub(old.cost());
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }

    /// Remove a resident thumbnail.
    pub fn remove(&self, key: &CacheKey) -> Option<Thumbnail> {
        let mut inner = self.lock();
        let removed = inner.images.pop(key);
        if let Some(ref thumb) = removed {
            inner.current_size = inner.current_size.saturating_sub(thumb.cost());
        }
        removed
    }

    /// Drop every resident thumbnail belonging to a document.
    ///
    /// Pending markers are owned by in-flight jobs and are left alone.
    pub fn remove_document(&self, guid: &DocumentGuid) -> usize {
        let mut inner = self.lock();
        let keys: Vec<CacheKey> = inner
            .images
            .iter()
            .filter(|(k, _)| &k.guid == guid)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &keys {
            if let Some(thumb) = inner.images.pop(key) {
                inner.current_size = inner.current_size.saturating_sub(thumb.cost());
            }
        }
        keys.len()
    }

    /// Drop all resident thumbnails. Pending markers are kept, since their
    /// jobs are still in flight.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.images.clear();
        inner.current_size = 0;
    }

    /// Record that a render job for `key` is in flight.
    pub fn mark_pending(&self, key: &CacheKey) -> Result<(), AlreadyPending> {
        if self.lock().pending.insert(key.clone()) {
            Ok(())
        } else {
            Err(AlreadyPending)
        }
    }

    /// Remove a pending marker. Returns whether one existed.
    pub fn clear_pending(&self, key: &CacheKey) -> bool {
        self.lock().pending.remove(key)
    }

    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.lock().pending.contains(key)
    }

    /// Classify a key without touching recency.
    ///
    /// A resident image wins over a pending marker.
    pub fn entry(&self, key: &CacheKey) -> CacheEntry {
        let inner = self.lock();
        if let Some(thumb) = inner.images.peek(key) {
            CacheEntry::Image(thumb.clone())
        } else if inner.pending.contains(key) {
            CacheEntry::Pending
        } else {
            CacheEntry::Absent
        }
    }

    pub fn len(&self) -> usize {
        self.lock().images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().images.is_empty()
    }

    /// Current summed cost of resident thumbnails in bytes.
    pub fn size(&self) -> usize {
        self.lock().current_size
    }

    /// Budget in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
