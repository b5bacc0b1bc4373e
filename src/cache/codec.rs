//! Thumbnail bitmaps and their on-disk encoding.
//!
//! Thumbnails are held in memory as raw RGBA8 pixels so they can be handed to
//! a display without further decoding. The disk tier stores them as PNG.
//!
//! # Design Decisions
//!
//! - **Decode on load**: A disk hit is fully decoded before it enters the
//!   memory tier, so the consumer never pays decode cost on its own thread.
//!
//! - **Lossless**: PNG keeps text on thumbnails legible; the files are small
//!   enough that compression ratio is not a concern.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, ImageReader, RgbaImage};

use crate::error::CacheError;

/// Bytes per RGBA8 pixel.
const BYTES_PER_PIXEL: usize = 4;

// =============================================================================
// Thumbnail
// =============================================================================

/// A rendered thumbnail: RGBA8 pixels, row-major, no padding.
///
/// Cloning is cheap; the pixel buffer is reference counted.
#[derive(Clone, PartialEq, Eq)]
pub struct Thumbnail {
    width: u32,
    height: u32,
    pixels: Bytes,
}

impl Thumbnail {
    /// Wrap an RGBA8 buffer.
    ///
    /// Returns `None` if the buffer length does not match the dimensions.
    pub fn from_rgba(width: u32, height: u32, pixels: impl Into<Bytes>) -> Option<Self> {
        let pixels = pixels.into();
        if pixels.len() != width as usize * height as usize * BYTES_PER_PIXEL {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    /// A thumbnail filled with one color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels: Vec<u8> = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * BYTES_PER_PIXEL)
            .collect();
        Self {
            width,
            height,
            pixels: Bytes::from(pixels),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }

    /// Memory cost charged against the memory tier budget.
    pub fn cost(&self) -> usize {
        self.pixels.len()
    }
}

impl std::fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thumbnail")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

// =============================================================================
// PNG Codec
// =============================================================================

/// Encode a thumbnail as PNG.
pub fn encode_png(thumb: &Thumbnail) -> Result<Vec<u8>, CacheError> {
    let mut output = Vec::new();
    PngEncoder::new(&mut output)
        .write_image(
            &thumb.pixels,
            thumb.width,
            thumb.height,
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| CacheError::Encode(e.to_string()))?;
    Ok(output)
}

/// Decode PNG data into a thumbnail.
///
/// Any color type is accepted and converted to RGBA8. The error message is
/// returned as a plain string; the caller attaches the file path.
pub fn decode_png(data: &[u8]) -> Result<Thumbnail, String> {
    let reader = ImageReader::with_format(Cursor::new(data), image::ImageFormat::Png);
    let img = reader.decode().map_err(|e| e.to_string())?;
    let rgba: RgbaImage = img.into_rgba8();
    let (width, height) = rgba.dimensions();

    Ok(Thumbnail {
        width,
        height,
        pixels: Bytes::from(rgba.into_raw()),
    })
}

// =============================================================================
// Tests
// =============================================================================
