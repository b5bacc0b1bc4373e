//! Cache keys for thumbnails.

use std::fmt;

use crate::document::DocumentGuid;

/// Page number plus target pixel size of one thumbnail variant.
///
/// Two descriptors with equal fields are interchangeable cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThumbDescriptor {
    /// Page number (as passed to the rasterizer)
    pub page: u32,

    /// Target width in pixels
    pub width: u32,

    /// Target height in pixels
    pub height: u32,
}

impl ThumbDescriptor {
    pub fn new(page: u32, width: u32, height: u32) -> Self {
        Self {
            page,
            width,
            height,
        }
    }

    /// Deterministic name of this variant, e.g. `3-120x160`.
    ///
    /// Also used as the on-disk file stem.
    pub fn thumb_name(&self) -> String {
        format!("{}-{}x{}", self.page, self.width, self.height)
    }

    /// Parse a name produced by [`thumb_name`](Self::thumb_name).
    pub fn parse(name: &str) -> Option<Self> {
        let (page, size) = name.split_once('-')?;
        let (width, height) = size.split_once('x')?;
        Some(Self::new(
            page.parse().ok()?,
            width.parse().ok()?,
            height.parse().ok()?,
        ))
    }
}

/// Key of one cached thumbnail: document plus descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub guid: DocumentGuid,
    pub descriptor: ThumbDescriptor,
}

impl CacheKey {
    pub fn new(guid: impl Into<DocumentGuid>, descriptor: ThumbDescriptor) -> Self {
        Self {
            guid: guid.into(),
            descriptor,
        }
    }

    pub fn thumb_name(&self) -> String {
        self.descriptor.thumb_name()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.descriptor.thumb_name(), self.guid)
    }
}
