//! Display-slot side of the request protocol.
//!
//! A [`ThumbView`] is one reusable cell of a thumbnail strip or page
//! scrubber. Virtualized lists reassign cells to new pages while requests
//! for the old page are still in flight, so every delivery is checked
//! against the cell's current [`TargetTag`] and dropped on mismatch.
//!
//! ```text
//! show_page(p1) ─▶ tag = T1, submit ───────────────┐
//! show_page(p2) ─▶ release(p1), clear, tag = T2    │
//!                                                  ▼
//!                  deliver(T1) ─▶ T1 != T2 ─▶ discarded
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::cache::{ThumbDescriptor, Thumbnail};
use crate::document::{DocumentGuid, DocumentSource};
use crate::error::QueueError;
use crate::queue::{
    Delivery, Priority, Submission, TargetTag, ThumbHandle, ThumbOutcome, ThumbQueue,
    ThumbRequest, ThumbSink,
};

#[derive(Default)]
struct ViewState {
    target_tag: TargetTag,
    image: Option<Thumbnail>,
    handle: Option<ThumbHandle>,
    failed: bool,
}

/// A reusable display slot for one thumbnail.
///
/// Share it as `Arc<ThumbView>`; the queue only keeps a weak reference.
#[derive(Default)]
pub struct ThumbView {
    state: Mutex<ViewState>,
}

impl ThumbView {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Point the slot at a page and request its thumbnail.
    ///
    /// Any previous request is released and the displayed image cleared
    /// before the new one is submitted. A thumbnail already in memory is
    /// shown immediately.
    pub fn show_page(
        self: &Arc<Self>,
        queue: &ThumbQueue,
        source: DocumentSource,
        guid: impl Into<DocumentGuid>,
        descriptor: ThumbDescriptor,
        priority: Priority,
    ) -> Result<(), QueueError> {
        let request = ThumbRequest::new(
            self,
            source,
            guid,
            descriptor.page,
            (descriptor.width, descriptor.height),
        );
        let tag = request.target_tag();

        let previous = {
            let mut state = self.lock();
            state.target_tag = tag;
            state.image = None;
            state.failed = false;
            state.handle.take()
        };
        if let Some(handle) = previous {
            queue.release(handle);
        }

        let submission = queue.submit(&request, priority)?;

        let mut state = self.lock();
        if state.target_tag != tag {
            // Reassigned again while submitting.
            drop(state);
            if let Submission::Queued(handle) = submission {
                queue.release(handle);
            }
            return Ok(());
        }

        match submission {
            Submission::Ready(thumb) => state.image = Some(thumb),
            Submission::Queued(handle) => {
                // A delivery that already landed leaves nothing to wait for.
                if state.image.is_none() && !state.failed {
                    state.handle = Some(handle);
                }
            }
        }
        Ok(())
    }

    /// Reset to the empty state and release the outstanding request.
    pub fn clear_for_reuse(&self, queue: &ThumbQueue) {
        let previous = {
            let mut state = self.lock();
            state.target_tag = TargetTag::EMPTY;
            state.image = None;
            state.failed = false;
            state.handle.take()
        };
        if let Some(handle) = previous {
            queue.release(handle);
        }
    }

    /// Move the outstanding request ahead of normal-priority work.
    pub fn promote(&self, queue: &ThumbQueue) -> bool {
        let state = self.lock();
        state
            .handle
            .as_ref()
            .is_some_and(|handle| queue.promote(handle))
    }

    pub fn image(&self) -> Option<Thumbnail> {
        self.lock().image.clone()
    }

    pub fn target_tag(&self) -> TargetTag {
        self.lock().target_tag
    }

    /// Whether the current page failed to render and shows a placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.lock().failed
    }

    /// Whether a request for the current page is outstanding.
    pub fn is_waiting(&self) -> bool {
        self.lock().handle.is_some()
    }
}

impl ThumbSink for ThumbView {
    fn deliver(&self, delivery: Delivery) {
        let mut state = self.lock();
        if state.target_tag.is_empty() || state.target_tag != delivery.target_tag {
            debug!(key = %delivery.key, "stale delivery discarded");
            return;
        }

        state.handle = None;
        match delivery.outcome {
            ThumbOutcome::Image(thumb) => state.image = Some(thumb),
            ThumbOutcome::NoThumbnail => state.failed = true,
        }
    }
}
