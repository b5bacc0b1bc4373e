//! Boundary to the page rasterizer.
//!
//! The queue treats the rasterizer as a black box that may be slow and may
//! fail. Implementations doing CPU-bound work should move it off the async
//! executor with `tokio::task::spawn_blocking`.

use async_trait::async_trait;

use crate::cache::Thumbnail;
use crate::document::DocumentSource;
use crate::error::RenderError;

/// Renders one page of a document into a thumbnail.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Render `page` of `source` to fit inside `size` (width, height).
    ///
    /// Implementations should keep the page's aspect ratio; the returned
    /// bitmap may be smaller than `size` (see [`fit_thumbnail`]).
    async fn render(
        &self,
        source: &DocumentSource,
        page: u32,
        size: (u32, u32),
    ) -> Result<Thumbnail, RenderError>;
}

/// Pixel size of a thumbnail for a page of `page_size` points, rotated by
/// `rotation` degrees, fitted inside `bounds`.
///
/// Keeps the aspect ratio and rounds each side down to an even number of
/// pixels, never below 2. Returns `None` for a degenerate page or for
/// bounds narrower than 2 pixels on either side.
pub fn fit_thumbnail(page_size: (f64, f64), rotation: i32, bounds: (u32, u32)) -> Option<(u32, u32)> {
    let (page_w, page_h) = match rotation.rem_euclid(360) {
        90 | 270 => (page_size.1, page_size.0),
        _ => page_size,
    };
    if !(page_w > 0.0 && page_h > 0.0) || bounds.0 < 2 || bounds.1 < 2 {
        return None;
    }

    let scale = (bounds.0 as f64 / page_w).min(bounds.1 as f64 / page_h);
    // Absorb float error so an exact fit is not rounded down a pixel.
    let even = |v: f64| {
        let px = (v + 1e-6).floor() as u32;
        px - px % 2
    };

    let width = even(page_w * scale).max(2);
    let height = even(page_h * scale).max(2);
    Some((width, height))
}
