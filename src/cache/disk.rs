//! On-disk thumbnail tier.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/
//!   <guid>/            one region per document, mtime = last touch
//!     3-120x160.png    one file per thumbnail, named by thumbName
//!     4-120x160.png
//!   <other guid>/
//! ```
//!
//! The tier is a warm cache across process runs and is unbounded; it only
//! shrinks through [`DiskTier::remove_region`] and
//! [`DiskTier::purge_older_than`]. Deleting the whole root is always safe and
//! only forces re-rendering.
//!
//! # Region Locking
//!
//! Each region has a `tokio::sync::RwLock`. Loads, saves and touches hold it
//! shared; deletes, region removal and purge hold it exclusively. Purge
//! re-reads the region's mtime after acquiring the write lock, so a region
//! touched while purge was waiting is kept. Lock entries of removed regions
//! are dropped once nobody else holds them.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::codec::{decode_png, encode_png, Thumbnail};
use super::key::CacheKey;
use crate::document::DocumentGuid;
use crate::error::CacheError;

/// Extension of persisted thumbnails.
const THUMB_EXTENSION: &str = "png";

/// Default number of retries for transient I/O errors.
pub const DEFAULT_IO_RETRIES: u32 = 1;

/// Unique suffix for in-progress writes.
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

// =============================================================================
// Region Info
// =============================================================================

/// Summary of one on-disk region.
#[derive(Debug, Clone, Serialize)]
pub struct RegionInfo {
    /// Document GUID the region belongs to
    pub guid: String,

    /// Region directory
    pub path: PathBuf,

    /// Number of persisted thumbnails
    pub files: usize,

    /// Total size of persisted thumbnails in bytes
    pub bytes: u64,

    /// Seconds since the region was last touched
    pub age_secs: u64,
}

// =============================================================================
// Disk Tier
// =============================================================================

/// Persistent per-document thumbnail storage.
pub struct DiskTier {
    root: PathBuf,
    io_retries: u32,
    regions: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl DiskTier {
    /// Create a tier rooted at `root`. Nothing is created on disk until the
    /// first region is.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_retries(root, DEFAULT_IO_RETRIES)
    }

    /// Create a tier with a custom transient-error retry count.
    pub fn with_retries(root: impl Into<PathBuf>, io_retries: u32) -> Self {
        Self {
            root: root.into(),
            io_retries,
            regions: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a document's region.
    ///
    /// Deterministic and stable across runs. The GUID is percent-encoded so
    /// that no GUID can name a path outside the root.
    pub fn path_for(&self, guid: &DocumentGuid) -> PathBuf {
        self.root.join(region_dir_name(guid))
    }

    /// File holding one persisted thumbnail.
    pub fn file_for(&self, key: &CacheKey) -> PathBuf {
        self.path_for(&key.guid)
            .join(format!("{}.{}", key.thumb_name(), THUMB_EXTENSION))
    }

    fn region_lock(&self, dir_name: &str) -> Arc<RwLock<()>> {
        let mut regions = self.regions.lock().unwrap_or_else(|e| e.into_inner());
        regions
            .entry(dir_name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Forget a removed region's lock unless another operation still holds it.
    fn prune_region_lock(&self, dir_name: &str, lock: Arc<RwLock<()>>) {
        drop(lock);
        let mut regions = self.regions.lock().unwrap_or_else(|e| e.into_inner());
        if regions
            .get(dir_name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            regions.remove(dir_name);
        }
    }

    /// Run `op`, retrying transient failures up to `io_retries` times.
    ///
    /// `NotFound` is returned immediately; it is an answer, not a failure.
    async fn retry_io<T, F, Fut>(&self, path: &Path, mut op: F) -> Result<T, std::io::Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::io::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.kind() == ErrorKind::NotFound => return Err(e),
                Err(e) if attempt < self.io_retries => {
                    attempt += 1;
                    warn!(path = %path.display(), error = %e, attempt, "retrying cache I/O");
                }
                Err(e) => return Err(e),
            }
        }
    }

    // =========================================================================
    // Thumbnails
    // =========================================================================

    /// Load a persisted thumbnail.
    ///
    /// Returns `Ok(None)` when nothing is persisted. A file that cannot be
    /// decoded is deleted and reported as [`CacheError::Corrupt`].
    pub async fn load(&self, key: &CacheKey) -> Result<Option<Thumbnail>, CacheError> {
        let lock = self.region_lock(&region_dir_name(&key.guid));
        let _shared = lock.read().await;

        let path = self.file_for(key);
        let data = match self.retry_io(&path, || tokio::fs::read(&path)).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        let decoded = tokio::task::spawn_blocking(move || decode_png(&data))
            .await
            .unwrap_or_else(|e| Err(e.to_string()));

        match decoded {
            Ok(thumb) => Ok(Some(thumb)),
            Err(message) => {
                warn!(path = %path.display(), %message, "deleting corrupt cache file");
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    debug!(path = %path.display(), error = %e, "failed to delete corrupt file");
                }
                Err(CacheError::Corrupt { path, message })
            }
        }
    }

    /// Persist a thumbnail, creating its region if needed.
    ///
    /// The file is written under a temporary name and renamed into place, so
    /// a concurrent load never observes a partial file.
    pub async fn save(&self, key: &CacheKey, thumb: &Thumbnail) -> Result<(), CacheError> {
        self.save_if(key, thumb, || true).await.map(|_| ())
    }

    /// Persist a thumbnail only if `still_wanted` holds once the region lock
    /// is taken. Returns whether the file was written.
    ///
    /// A removal that clears its callers' state before taking the exclusive
    /// lock can never be followed by this write.
    pub async fn save_if(
        &self,
        key: &CacheKey,
        thumb: &Thumbnail,
        still_wanted: impl FnOnce() -> bool,
    ) -> Result<bool, CacheError> {
        let thumb = thumb.clone();
        let encoded = tokio::task::spawn_blocking(move || encode_png(&thumb))
            .await
            .map_err(|e| CacheError::Encode(e.to_string()))??;

        let lock = self.region_lock(&region_dir_name(&key.guid));
        let _shared = lock.read().await;

        if !still_wanted() {
            debug!(%key, "thumbnail removed before persisting, skipped");
            return Ok(false);
        }

        let dir = self.path_for(&key.guid);
        let path = self.file_for(key);
        let tmp = path.with_extension(format!(
            "{}.{}-{}",
            THUMB_EXTENSION,
            std::process::id(),
            WRITE_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let (dir_ref, tmp_ref, path_ref, data) = (&dir, &tmp, &path, encoded.as_slice());
        let result = self
            .retry_io(&path, move || async move {
                tokio::fs::create_dir_all(dir_ref).await?;
                tokio::fs::write(tmp_ref, data).await?;
                tokio::fs::rename(tmp_ref, path_ref).await
            })
            .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CacheError::io(&path, e));
        }
        Ok(true)
    }

    /// Delete one persisted thumbnail. Returns whether a file existed.
    pub async fn delete(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let lock = self.region_lock(&region_dir_name(&key.guid));
        let _exclusive = lock.write().await;

        let path = self.file_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    // =========================================================================
    // Regions
    // =========================================================================

    /// Create a document's region. Idempotent.
    pub async fn create_region(&self, guid: &DocumentGuid) -> Result<(), CacheError> {
        let path = self.path_for(guid);
        self.retry_io(&path, || tokio::fs::create_dir_all(&path))
            .await
            .map_err(|e| CacheError::io(&path, e))
    }

    /// Set a region's last-touch time to now without reading its contents.
    ///
    /// Touching a region that does not exist is a no-op.
    pub async fn touch(&self, guid: &DocumentGuid) -> Result<(), CacheError> {
        let lock = self.region_lock(&region_dir_name(guid));
        let _shared = lock.read().await;

        let path = self.path_for(guid);
        let result = self
            .retry_io(&path, || {
                let path = path.clone();
                async move {
                    tokio::task::spawn_blocking(move || {
                        filetime::set_file_mtime(&path, FileTime::now())
                    })
                    .await
                    .map_err(std::io::Error::other)?
                }
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Delete a document's region and every thumbnail in it. Idempotent.
    ///
    /// Returns whether a region existed.
    pub async fn remove_region(&self, guid: &DocumentGuid) -> Result<bool, CacheError> {
        let dir_name = region_dir_name(guid);
        let lock = self.region_lock(&dir_name);

        let path = self.path_for(guid);
        let result = {
            let _exclusive = lock.write().await;
            self.retry_io(&path, || tokio::fs::remove_dir_all(&path)).await
        };
        self.prune_region_lock(&dir_name, lock);

        match result {
            Ok(()) => {
                info!(%guid, "removed thumbnail region");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Delete every region last touched more than `age` ago.
    ///
    /// Returns the GUIDs of the removed regions. Regions with an operation in
    /// progress are waited for, then re-checked.
    pub async fn purge_older_than(&self, age: Duration) -> Result<Vec<String>, CacheError> {
        self.purge_older_than_with(age, |_| {}).await
    }

    /// Like [`purge_older_than`](Self::purge_older_than), calling `on_purged`
    /// for each removed region while its exclusive lock is still held.
    pub async fn purge_older_than_with(
        &self,
        age: Duration,
        mut on_purged: impl FnMut(&DocumentGuid),
    ) -> Result<Vec<String>, CacheError> {
        let mut purged = Vec::new();

        for dir_name in self.region_dir_names().await? {
            let lock = self.region_lock(&dir_name);
            let removed = {
                let _exclusive = lock.write().await;
                self.purge_region(&dir_name, age, &mut on_purged).await
            };
            match removed {
                Ok(Some(guid)) => {
                    self.prune_region_lock(&dir_name, lock);
                    purged.push(guid);
                }
                Ok(None) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(purged)
    }

    /// Remove one region if it is stale. The caller holds its exclusive lock.
    async fn purge_region(
        &self,
        dir_name: &str,
        age: Duration,
        on_purged: &mut impl FnMut(&DocumentGuid),
    ) -> Result<Option<String>, CacheError> {
        let path = self.root.join(dir_name);
        let modified = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.modified().map_err(|e| CacheError::io(&path, e))?,
            // Removed while we waited for the lock.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        if region_age(modified) <= age {
            return Ok(None);
        }

        match self.retry_io(&path, || tokio::fs::remove_dir_all(&path)).await {
            Ok(()) => {
                let guid = decode_dir_name(dir_name);
                on_purged(&DocumentGuid::new(guid.as_str()));
                info!(%guid, "purged stale thumbnail region");
                Ok(Some(guid))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Describe every region under the root.
    pub async fn regions(&self) -> Result<Vec<RegionInfo>, CacheError> {
        let mut infos = Vec::new();

        for dir_name in self.region_dir_names().await? {
            let lock = self.region_lock(&dir_name);
            let _shared = lock.read().await;

            let path = self.root.join(&dir_name);
            let modified = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.modified().map_err(|e| CacheError::io(&path, e))?,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(CacheError::io(&path, e)),
            };

            let mut files = 0;
            let mut bytes = 0;
            let mut entries = match tokio::fs::read_dir(&path).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(CacheError::io(&path, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| CacheError::io(&path, e))?
            {
                let entry_path = entry.path();
                if entry_path.extension().and_then(|e| e.to_str()) != Some(THUMB_EXTENSION) {
                    continue;
                }
                if let Ok(meta) = entry.metadata().await {
                    files += 1;
                    bytes += meta.len();
                }
            }

            infos.push(RegionInfo {
                guid: decode_dir_name(&dir_name),
                path,
                files,
                bytes,
                age_secs: region_age(modified).as_secs(),
            });
        }

        infos.sort_by(|a, b| a.guid.cmp(&b.guid));
        Ok(infos)
    }

    /// Names of all region directories under the root.
    async fn region_dir_names(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(CacheError::io(&self.root, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.root, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        Ok(names)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Map a GUID to a single, safe path component.
fn region_dir_name(guid: &DocumentGuid) -> String {
    let encoded = urlencoding::encode(guid.as_str()).into_owned();
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None if encoded.is_empty() => "%00".to_string(),
        None => encoded,
    }
}

fn decode_dir_name(name: &str) -> String {
    if name == "%00" {
        return String::new();
    }
    urlencoding::decode(name)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| name.to_string())
}

fn region_age(modified: SystemTime) -> Duration {
    SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO)
}

// =============================================================================
// Tests
// =============================================================================
