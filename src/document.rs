//! Document identity and location.
//!
//! A document is identified in the cache by its [`DocumentGuid`], which must be
//! stable for the lifetime of the document (across process restarts) and
//! never shared between two documents. The GUID scopes both the on-disk cache
//! region and mass cancellation in the queue.
//!
//! [`DocumentGuid::fingerprint`] derives a GUID from file content rather than
//! its path, so a renamed or moved file keeps its cached thumbnails.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::DocumentError;

/// Number of leading bytes hashed when fingerprinting a document.
const FINGERPRINT_PREFIX_LEN: u64 = 64 * 1024;

/// Length of the hex-encoded fingerprint GUID.
const FINGERPRINT_HEX_LEN: usize = 32;

// =============================================================================
// Document GUID
// =============================================================================

/// Stable, opaque identifier of one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentGuid(Arc<str>);

impl DocumentGuid {
    /// Wrap a caller-assigned identifier.
    pub fn new(guid: impl Into<Arc<str>>) -> Self {
        Self(guid.into())
    }

    /// Derive a GUID from the file's content.
    ///
    /// Hashes the file length followed by its first 64 KiB with SHA-256. Two
    /// copies of the same file map to the same GUID regardless of location.
    pub fn fingerprint(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let map_err = |e: std::io::Error| DocumentError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        let file = File::open(path).map_err(map_err)?;
        let len = file.metadata().map_err(map_err)?.len();

        let mut prefix = Vec::with_capacity(FINGERPRINT_PREFIX_LEN.min(len) as usize);
        file.take(FINGERPRINT_PREFIX_LEN)
            .read_to_end(&mut prefix)
            .map_err(map_err)?;

        let mut hasher = Sha256::new();
        hasher.update(len.to_le_bytes());
        hasher.update(&prefix);
        let digest = hex::encode(hasher.finalize());

        Ok(Self::new(&digest[..FINGERPRINT_HEX_LEN]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentGuid {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DocumentGuid {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

// =============================================================================
// Document Source
// =============================================================================

/// Where a document lives and how to unlock it.
///
/// This is what the rasterizer receives; the cache never opens the document.
#[derive(Clone, PartialEq, Eq)]
pub struct DocumentSource {
    /// Location of the document file
    pub path: PathBuf,

    /// Password for encrypted documents
    pub credential: Option<String>,
}

impl DocumentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            credential: None,
        }
    }

    pub fn with_credential(path: impl Into<PathBuf>, credential: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            credential: Some(credential.into()),
        }
    }
}

// Credentials never end up in logs.
impl fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSource")
            .field("path", &self.path)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
