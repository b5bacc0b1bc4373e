use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors reported by a rasterizer when it cannot produce a thumbnail.
///
/// The queue never inspects the reason beyond logging it; every variant is
/// surfaced to listeners as "no thumbnail".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The document file could not be opened or read
    #[error("Document unreadable: {0}")]
    Unreadable(String),

    /// The document is encrypted and the credential did not unlock it
    #[error("Bad credential for encrypted document")]
    BadCredential,

    /// The requested page does not exist
    #[error("Page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    /// The page exists but could not be decoded
    #[error("Corrupt page data: {0}")]
    Corrupt(String),
}

/// Errors from the on-disk cache tier.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Filesystem error while reading or writing a cache file
    #[error("I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// A persisted thumbnail could not be decoded
    #[error("Corrupt cache file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    /// A thumbnail could not be encoded for persistence
    #[error("Encode error: {0}")]
    Encode(String),
}

impl CacheError {
    pub(crate) fn io(path: &Path, err: std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    /// Whether the failure is worth retrying.
    ///
    /// Only I/O errors are transient; corrupt or unencodable data will fail
    /// the same way on every attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, CacheError::Io { .. })
    }
}

/// Errors that can occur while identifying a document.
#[derive(Debug, Clone, Error)]
pub enum DocumentError {
    /// The document file could not be read for fingerprinting
    #[error("I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },
}

/// Errors from the render queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue configuration failed validation
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),

    /// The queue has been shut down and accepts no new work
    #[error("Queue is shut down")]
    ShutDown,
}
