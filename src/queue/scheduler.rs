//! Two-tier render scheduler.
//!
//! Every unresolved request becomes at most one job per cache key. A job
//! starts on the fetch tier (disk lookup) and moves to the render tier on a
//! miss. Requests for a key that already has a job attach to it as extra
//! listeners, and every listener receives the same outcome exactly once.
//!
//! # Job lifecycle
//!
//! ```text
//! submit ─▶ Queued(fetch) ─▶ Running(fetch) ─┬─ hit ──────────────▶ deliver
//!                                            └─ miss ─▶ Queued(render)
//!                                                          │
//!                      deliver ◀── store / clear_pending ◀─ Running(render)
//! ```
//!
//! Cancelling a queued job removes it outright. Cancelling a running job
//! marks it `Cancelled`: the rasterizer call completes and a successful
//! result is still stored, but nothing is delivered.
//!
//! # Locking
//!
//! Job bookkeeping lives in one registry mutex. Pending markers are set and
//! cleared while that mutex is held, so the marker set and the job table
//! never disagree. Lock order is registry, then cache. Neither lock is held
//! across an await or while calling a [`ThumbSink`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::rasterizer::Rasterizer;
use super::request::{
    Delivery, Priority, Submission, TargetTag, ThumbHandle, ThumbOutcome, ThumbRequest, ThumbSink,
};
use crate::cache::{CacheKey, Lookup, ThumbCache, Thumbnail};
use crate::config::ThumbConfig;
use crate::document::{DocumentGuid, DocumentSource};
use crate::error::QueueError;

// =============================================================================
// Job Bookkeeping
// =============================================================================

/// Worker pool a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tier {
    Fetch,
    Render,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Queued,
    Running,

    /// Running, but its result will not be delivered
    Cancelled,
}

/// Snapshot of one job, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub key: String,
    pub tier: Tier,
    pub priority: Priority,
    pub state: JobState,
    pub listeners: usize,
}

/// Queue counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued_fetch: usize,
    pub queued_render: usize,
    pub running: usize,
    pub cancelled: usize,
    pub jobs: usize,
}

struct Listener {
    id: u64,
    slot: Weak<dyn ThumbSink>,
    tag: TargetTag,
}

struct Job {
    source: DocumentSource,
    priority: Priority,
    tier: Tier,
    state: JobState,
    token: CancellationToken,
    listeners: Vec<Listener>,
}

/// FIFO per priority; high is always served first.
#[derive(Default)]
struct TierQueue {
    high: VecDeque<CacheKey>,
    normal: VecDeque<CacheKey>,
}

impl TierQueue {
    fn push(&mut self, key: CacheKey, priority: Priority) {
        match priority {
            Priority::High => self.high.push_back(key),
            Priority::Normal => self.normal.push_back(key),
        }
    }

    fn pop(&mut self) -> Option<CacheKey> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }

    fn remove(&mut self, key: &CacheKey) {
        self.high.retain(|k| k != key);
        self.normal.retain(|k| k != key);
    }

    /// Move a normal-priority key behind the queued high-priority keys.
    fn promote(&mut self, key: &CacheKey) -> bool {
        match self.normal.iter().position(|k| k == key) {
            Some(index) => {
                self.normal.remove(index);
                self.high.push_back(key.clone());
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<CacheKey, Job>,
    fetch: TierQueue,
    render: TierQueue,
    next_listener: u64,
}

impl Registry {
    fn tier_mut(&mut self, tier: Tier) -> &mut TierQueue {
        match tier {
            Tier::Fetch => &mut self.fetch,
            Tier::Render => &mut self.render,
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

struct Shared {
    cache: Arc<ThumbCache>,
    rasterizer: Arc<dyn Rasterizer>,
    registry: Mutex<Registry>,
    fetch_ready: Notify,
    render_ready: Notify,
    shutdown: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ready(&self, tier: Tier) -> &Notify {
        match tier {
            Tier::Fetch => &self.fetch_ready,
            Tier::Render => &self.render_ready,
        }
    }

    /// Pop the next queued job of `tier` and mark it running.
    ///
    /// Jobs whose display slots have all been dropped are abandoned instead.
    fn next_job(&self, tier: Tier) -> Option<(CacheKey, DocumentSource, CancellationToken)> {
        let mut guard = self.lock();
        let registry = &mut *guard;

        while let Some(key) = registry.tier_mut(tier).pop() {
            let Some(job) = registry.jobs.get_mut(&key) else {
                continue;
            };
            if job.listeners.iter().all(|l| l.slot.strong_count() == 0) {
                self.abandon(registry, &key);
                debug!(%key, ?tier, "every slot dropped, job abandoned");
                continue;
            }
            job.state = JobState::Running;
            let next = (key, job.source.clone(), job.token.clone());

            // Hand the remaining backlog to another idle worker.
            if registry.tier_mut(tier).len() > 0 {
                self.ready(tier).notify_one();
            }
            return Some(next);
        }
        None
    }

    /// Drop a job whose work is abandoned, so a later request can retry.
    fn abandon(&self, registry: &mut Registry, key: &CacheKey) -> Option<Job> {
        let job = registry.jobs.remove(key)?;
        if job.state == JobState::Queued {
            registry.tier_mut(job.tier).remove(key);
        }
        self.cache.clear_pending(key);
        Some(job)
    }

    fn deliver(&self, key: &CacheKey, listeners: Vec<Listener>, outcome: ThumbOutcome) {
        for listener in listeners {
            match listener.slot.upgrade() {
                Some(slot) => slot.deliver(Delivery {
                    key: key.clone(),
                    target_tag: listener.tag,
                    outcome: outcome.clone(),
                }),
                None => debug!(%key, listener = listener.id, "slot dropped before delivery"),
            }
        }
    }

    // =========================================================================
    // Fetch Tier
    // =========================================================================

    async fn run_fetch(&self, key: CacheKey) {
        let lookup = self.cache.lookup(&key).await;

        let hit = {
            let mut guard = self.lock();
            let registry = &mut *guard;

            match lookup {
                Lookup::Hit(thumb) => {
                    self.cache.clear_pending(&key);
                    registry.jobs.remove(&key).map(|job| (job, thumb))
                }
                Lookup::Miss => {
                    let requeue = match registry.jobs.get_mut(&key) {
                        Some(job) if job.state != JobState::Cancelled => {
                            job.tier = Tier::Render;
                            job.state = JobState::Queued;
                            Some(job.priority)
                        }
                        _ => None,
                    };

                    match requeue {
                        Some(priority) => {
                            registry.render.push(key.clone(), priority);
                            self.render_ready.notify_one();
                            debug!(%key, ?priority, "miss, queued for render");
                        }
                        None => {
                            self.abandon(registry, &key);
                            debug!(%key, "miss for cancelled job, dropped");
                        }
                    }
                    None
                }
            }
        };

        if let Some((job, thumb)) = hit {
            if job.state == JobState::Cancelled {
                debug!(%key, "hit for cancelled job, not delivered");
            } else {
                self.deliver(&key, job.listeners, ThumbOutcome::Image(thumb));
            }
        }
    }

    // =========================================================================
    // Render Tier
    // =========================================================================

    async fn run_render(&self, key: CacheKey, source: DocumentSource, token: CancellationToken) {
        // A token cancelled before rasterizing is authoritative unless a
        // later submit revived the job with a fresh one.
        if token.is_cancelled() {
            let mut guard = self.lock();
            let registry = &mut *guard;
            if registry
                .jobs
                .get(&key)
                .map_or(true, |job| job.state == JobState::Cancelled)
            {
                self.abandon(registry, &key);
                debug!(%key, "cancelled before render");
                return;
            }
        }

        let result = self.rasterize(&key, source).await;

        let finished = {
            let mut guard = self.lock();
            let job = guard.jobs.remove(&key);

            let outcome = match result {
                Ok(thumb) => {
                    // The persist task runs detached; failures are logged there.
                    let _persist = self.cache.store(key.clone(), thumb.clone());
                    ThumbOutcome::Image(thumb)
                }
                Err(reason) => {
                    self.cache.clear_pending(&key);
                    warn!(%key, %reason, "render failed");
                    ThumbOutcome::NoThumbnail
                }
            };

            match job {
                Some(job) if job.state != JobState::Cancelled => Some((job.listeners, outcome)),
                _ => {
                    debug!(%key, "render finished for cancelled job, not delivered");
                    None
                }
            }
        };

        if let Some((listeners, outcome)) = finished {
            self.deliver(&key, listeners, outcome);
        }
    }

    /// Run the rasterizer in its own task so a panic is reported as a
    /// failure instead of taking the worker down.
    async fn rasterize(&self, key: &CacheKey, source: DocumentSource) -> Result<Thumbnail, String> {
        let rasterizer = self.rasterizer.clone();
        let descriptor = key.descriptor;
        let task = tokio::spawn(async move {
            rasterizer
                .render(
                    &source,
                    descriptor.page,
                    (descriptor.width, descriptor.height),
                )
                .await
        });

        match task.await {
            Ok(Ok(thumb)) => Ok(thumb),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("rasterizer task failed: {}", e)),
        }
    }
}

async fn worker(shared: Arc<Shared>, tier: Tier) {
    loop {
        if shared.shutdown.is_cancelled() {
            return;
        }

        match shared.next_job(tier) {
            Some((key, source, token)) => match tier {
                Tier::Fetch => shared.run_fetch(key).await,
                Tier::Render => shared.run_render(key, source, token).await,
            },
            None => {
                tokio::select! {
                    _ = shared.ready(tier).notified() => {}
                    _ = shared.shutdown.cancelled() => return,
                }
            }
        }
    }
}

// =============================================================================
// ThumbQueue
// =============================================================================

/// Bounded-concurrency scheduler turning cache misses into render jobs.
///
/// Create one per process with [`ThumbQueue::start`] and share it by
/// reference. All consumer-facing methods are synchronous and only take
/// short locks, so they are safe to call from a UI-driving thread.
pub struct ThumbQueue {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThumbQueue {
    /// Validate `config` and spawn the fetch and render worker pools.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        cache: Arc<ThumbCache>,
        rasterizer: Arc<dyn Rasterizer>,
        config: &ThumbConfig,
    ) -> Result<Self, QueueError> {
        config.validate().map_err(QueueError::InvalidConfig)?;

        let shared = Arc::new(Shared {
            cache,
            rasterizer,
            registry: Mutex::new(Registry::default()),
            fetch_ready: Notify::new(),
            render_ready: Notify::new(),
            shutdown: CancellationToken::new(),
        });

        let mut workers = Vec::with_capacity(config.fetch_workers + config.render_workers);
        for _ in 0..config.fetch_workers {
            workers.push(tokio::spawn(worker(shared.clone(), Tier::Fetch)));
        }
        for _ in 0..config.render_workers {
            workers.push(tokio::spawn(worker(shared.clone(), Tier::Render)));
        }

        info!(
            fetch_workers = config.fetch_workers,
            render_workers = config.render_workers,
            "thumbnail queue started"
        );

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    pub fn cache(&self) -> &Arc<ThumbCache> {
        &self.shared.cache
    }

    /// Request a thumbnail.
    ///
    /// Returns [`Submission::Ready`] when the thumbnail is already in memory;
    /// nothing is delivered in that case. Otherwise the request is attached
    /// to the existing job for its key, or a new job is queued on the fetch
    /// tier, and the request's slot receives exactly one [`Delivery`] unless
    /// the handle is released or its document cancelled first.
    pub fn submit(&self, request: &ThumbRequest, priority: Priority) -> Result<Submission, QueueError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(QueueError::ShutDown);
        }

        let key = request.cache_key();
        let mut guard = self.shared.lock();
        let registry = &mut *guard;

        if let Some(thumb) = self.shared.cache.lookup_memory(key) {
            return Ok(Submission::Ready(thumb));
        }

        let listener = Listener {
            id: registry.next_listener,
            slot: request.slot(),
            tag: request.target_tag(),
        };
        registry.next_listener += 1;
        let handle = ThumbHandle {
            key: key.clone(),
            listener: listener.id,
        };

        if let Some(job) = registry.jobs.get_mut(key) {
            if job.state == JobState::Cancelled {
                job.state = JobState::Running;
                job.token = CancellationToken::new();
                debug!(%key, "revived cancelled job");
            }
            job.listeners.push(listener);

            if priority == Priority::High && job.priority == Priority::Normal {
                job.priority = Priority::High;
                if job.state == JobState::Queued {
                    let tier = job.tier;
                    registry.tier_mut(tier).promote(key);
                }
            }
            debug!(%key, ?priority, "attached to existing job");
            return Ok(Submission::Queued(handle));
        }

        if self.shared.cache.mark_pending(key).is_err() {
            warn!(%key, "pending marker without a job, adopting it");
        }

        registry.jobs.insert(
            key.clone(),
            Job {
                source: request.source().clone(),
                priority,
                tier: Tier::Fetch,
                state: JobState::Queued,
                token: CancellationToken::new(),
                listeners: vec![listener],
            },
        );
        registry.fetch.push(key.clone(), priority);
        self.shared.fetch_ready.notify_one();

        debug!(%key, ?priority, "queued");
        Ok(Submission::Queued(handle))
    }

    /// Raise a queued job to high priority, ahead of every queued
    /// normal-priority job of its tier.
    ///
    /// Returns `false` if the job is already running, already high priority,
    /// or gone.
    pub fn promote(&self, handle: &ThumbHandle) -> bool {
        let mut guard = self.shared.lock();
        let registry = &mut *guard;

        let Some(job) = registry.jobs.get_mut(&handle.key) else {
            return false;
        };
        if job.state != JobState::Queued || job.priority == Priority::High {
            return false;
        }
        if !job.listeners.iter().any(|l| l.id == handle.listener) {
            return false;
        }

        job.priority = Priority::High;
        let tier = job.tier;
        registry.tier_mut(tier).promote(&handle.key)
    }

    /// Detach a listener from its job.
    ///
    /// A queued job left without listeners is dropped. A running job keeps
    /// going so its result still reaches the cache.
    pub fn release(&self, handle: ThumbHandle) -> bool {
        let mut guard = self.shared.lock();
        let registry = &mut *guard;

        let Some(job) = registry.jobs.get_mut(&handle.key) else {
            return false;
        };
        let before = job.listeners.len();
        job.listeners.retain(|l| l.id != handle.listener);
        let removed = job.listeners.len() < before;

        if job.listeners.is_empty() && job.state == JobState::Queued {
            self.shared.abandon(registry, &handle.key);
            debug!(key = %handle.key, "last listener released, job dropped");
        }
        removed
    }

    /// Cancel every job of one document. Returns the number of jobs affected.
    pub fn cancel(&self, guid: &DocumentGuid) -> usize {
        let count = self.cancel_where(|key| &key.guid == guid);
        info!(%guid, jobs = count, "cancelled document jobs");
        count
    }

    /// Cancel every job. Returns the number of jobs affected.
    pub fn cancel_all(&self) -> usize {
        let count = self.cancel_where(|_| true);
        info!(jobs = count, "cancelled all jobs");
        count
    }

    fn cancel_where(&self, matches: impl Fn(&CacheKey) -> bool) -> usize {
        let mut guard = self.shared.lock();
        let registry = &mut *guard;

        let keys: Vec<CacheKey> = registry
            .jobs
            .iter()
            .filter(|(key, job)| job.state != JobState::Cancelled && matches(key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            let Some(job) = registry.jobs.get_mut(key) else {
                continue;
            };
            if job.state == JobState::Queued {
                self.shared.abandon(registry, key);
            } else {
                job.state = JobState::Cancelled;
                job.token.cancel();
                job.listeners.clear();
            }
        }
        keys.len()
    }

    /// Cancel all work and wait for the workers to exit.
    ///
    /// Running rasterizer calls are allowed to finish. Later submits fail
    /// with [`QueueError::ShutDown`].
    pub async fn shutdown(&self) {
        self.cancel_all();
        self.shared.shutdown.cancel();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "queue worker exited abnormally");
            }
        }
        info!("thumbnail queue shut down");
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn stats(&self) -> QueueStats {
        let registry = self.shared.lock();
        let mut stats = QueueStats {
            queued_fetch: registry.fetch.len(),
            queued_render: registry.render.len(),
            jobs: registry.jobs.len(),
            ..QueueStats::default()
        };
        for job in registry.jobs.values() {
            match job.state {
                JobState::Running => stats.running += 1,
                JobState::Cancelled => stats.cancelled += 1,
                JobState::Queued => {}
            }
        }
        stats
    }

    /// Jobs currently tracked for one document.
    pub fn jobs_for(&self, guid: &DocumentGuid) -> Vec<JobInfo> {
        let registry = self.shared.lock();
        registry
            .jobs
            .iter()
            .filter(|(key, _)| &key.guid == guid)
            .map(|(key, job)| JobInfo {
                key: key.to_string(),
                tier: job.tier,
                priority: job.priority,
                state: job.state,
                listeners: job.listeners.len(),
            })
            .collect()
    }
}

impl Drop for ThumbQueue {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

// =============================================================================
// Tests
// =============================================================================
