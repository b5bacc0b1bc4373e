//! Asynchronous thumbnail scheduling.
//!
//! Display slots describe the thumbnail they need with a [`ThumbRequest`]
//! and hand it to the [`ThumbQueue`]. The queue answers from memory
//! immediately when it can; otherwise it schedules one job per cache key
//! across two worker pools:
//!
//! - **fetch tier**: disk lookups, sized by I/O parallelism
//! - **render tier**: [`Rasterizer`] calls, sized by CPU cores
//!
//! Results come back through [`ThumbSink::deliver`], tagged with the
//! [`TargetTag`] of the request they answer.

mod rasterizer;
mod request;
mod scheduler;

pub use rasterizer::{fit_thumbnail, Rasterizer};
pub use request::{
    Delivery, Priority, Submission, TargetTag, ThumbHandle, ThumbOutcome, ThumbRequest, ThumbSink,
};
pub use scheduler::{JobInfo, JobState, QueueStats, ThumbQueue, Tier};
