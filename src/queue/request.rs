//! Request, delivery and handle types.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::cache::{CacheKey, ThumbDescriptor, Thumbnail};
use crate::document::{DocumentGuid, DocumentSource};

// =============================================================================
// Priority / Target Tag
// =============================================================================

/// Scheduling priority within a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// Identity of what a display slot is currently supposed to show.
///
/// Derived from the cache key, so two requests for the same thumbnail carry
/// the same tag. [`TargetTag::EMPTY`] is never produced by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TargetTag(u64);

impl TargetTag {
    /// Tag of a slot that shows nothing.
    pub const EMPTY: TargetTag = TargetTag(0);

    pub fn for_key(key: &CacheKey) -> Self {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        match hasher.finish() {
            0 => TargetTag(1),
            n => TargetTag(n),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

// =============================================================================
// Delivery
// =============================================================================

/// Outcome of a job, identical for every listener attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbOutcome {
    Image(Thumbnail),

    /// The rasterizer failed; show a placeholder
    NoThumbnail,
}

impl ThumbOutcome {
    pub fn image(&self) -> Option<&Thumbnail> {
        match self {
            ThumbOutcome::Image(thumb) => Some(thumb),
            ThumbOutcome::NoThumbnail => None,
        }
    }
}

/// A result handed to a display slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub key: CacheKey,

    /// Tag of the request this answers
    pub target_tag: TargetTag,

    pub outcome: ThumbOutcome,
}

/// Receiver of asynchronous deliveries.
///
/// Called from queue worker tasks, never with a queue lock held. A sink
/// must compare [`Delivery::target_tag`] against what it currently shows
/// and drop mismatches.
pub trait ThumbSink: Send + Sync {
    fn deliver(&self, delivery: Delivery);
}

/// Channel sink, for consumers that drain deliveries on their own thread.
impl ThumbSink for mpsc::UnboundedSender<Delivery> {
    fn deliver(&self, delivery: Delivery) {
        // A closed receiver means the consumer is gone.
        let _ = self.send(delivery);
    }
}

// =============================================================================
// Request
// =============================================================================

/// One unit of thumbnail work: which page of which document, at what size,
/// for which display slot.
///
/// Immutable once built. Construction never fails; an out-of-range page is
/// reported later as a render failure. The slot is held weakly, so dropping
/// a slot never blocks or leaks queue work.
#[derive(Clone)]
pub struct ThumbRequest {
    slot: Weak<dyn ThumbSink>,
    source: DocumentSource,
    key: CacheKey,
    target_tag: TargetTag,
}

impl ThumbRequest {
    pub fn new<S>(
        slot: &Arc<S>,
        source: DocumentSource,
        guid: impl Into<DocumentGuid>,
        page: u32,
        size: (u32, u32),
    ) -> Self
    where
        S: ThumbSink + 'static,
    {
        let slot: Weak<S> = Arc::downgrade(slot);
        let slot: Weak<dyn ThumbSink> = slot;
        let key = CacheKey::new(guid, ThumbDescriptor::new(page, size.0, size.1));
        Self {
            slot,
            source,
            target_tag: TargetTag::for_key(&key),
            key,
        }
    }

    pub fn cache_key(&self) -> &CacheKey {
        &self.key
    }

    pub fn thumb_name(&self) -> String {
        self.key.thumb_name()
    }

    pub fn target_tag(&self) -> TargetTag {
        self.target_tag
    }

    pub fn guid(&self) -> &DocumentGuid {
        &self.key.guid
    }

    pub fn page(&self) -> u32 {
        self.key.descriptor.page
    }

    pub fn size(&self) -> (u32, u32) {
        (self.key.descriptor.width, self.key.descriptor.height)
    }

    pub fn source(&self) -> &DocumentSource {
        &self.source
    }

    pub(crate) fn slot(&self) -> Weak<dyn ThumbSink> {
        self.slot.clone()
    }
}

impl std::fmt::Debug for ThumbRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbRequest")
            .field("key", &self.key.to_string())
            .field("source", &self.source)
            .field("target_tag", &self.target_tag)
            .field("slot_alive", &(self.slot.strong_count() > 0))
            .finish()
    }
}

// =============================================================================
// Submission
// =============================================================================

/// Registration of one listener on one job.
///
/// Pass it back to [`ThumbQueue::promote`](super::ThumbQueue::promote) or
/// [`ThumbQueue::release`](super::ThumbQueue::release).
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ThumbHandle {
    pub(crate) key: CacheKey,
    pub(crate) listener: u64,
}

impl ThumbHandle {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

/// Result of [`ThumbQueue::submit`](super::ThumbQueue::submit).
#[derive(Debug)]
pub enum Submission {
    /// The thumbnail was resident in memory; nothing will be delivered
    Ready(Thumbnail),

    /// A job will deliver to the request's slot
    Queued(ThumbHandle),
}

impl Submission {
    pub fn is_ready(&self) -> bool {
        matches!(self, Submission::Ready(_))
    }

    pub fn handle(&self) -> Option<&ThumbHandle> {
        match self {
            Submission::Ready(_) => None,
            Submission::Queued(handle) => Some(handle),
        }
    }
}
