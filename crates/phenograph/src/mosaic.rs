//! Mosaic previews assembled from named images.

use std::collections::HashMap;

use image::{DynamicImage, RgbImage, imageops};
use tracing::debug;

use crate::context::ProcessingContext;

/// Name standing for the unmodified input image in a layout.
pub const SOURCE_CELL: &str = "source";

/// Resize `image` into a `width` x `height` cell.
fn fit_cell(image: &DynamicImage, width: u32, height: u32) -> RgbImage {
    let rgb = image.to_rgb8();
    if rgb.dimensions() == (width, height) {
        return rgb;
    }
    imageops::resize(&rgb, width, height, imageops::FilterType::Triangle)
}

/// Assemble the mosaic described by `layout`.
///
/// Each cell has the size of the source image. Names resolve to the source
/// image, then the mosaic cache, then the context's named images; cells
/// that resolve to nothing stay black. Returns `None` for an empty layout.
pub fn build_mosaic(
    layout: &[Vec<String>],
    cache: &HashMap<String, DynamicImage>,
    ctx: &ProcessingContext,
) -> Option<DynamicImage> {
    let rows = layout.len() as u32;
    let cols = layout.iter().map(Vec::len).max().unwrap_or(0) as u32;
    if rows == 0 || cols == 0 {
        return None;
    }

    let (cell_w, cell_h) = (ctx.source_image().width(), ctx.source_image().height());
    let mut canvas = RgbImage::new(cell_w * cols, cell_h * rows);
    for (r, row) in layout.iter().enumerate() {
        for (c, name) in row.iter().enumerate() {
            let image = if name == SOURCE_CELL {
                Some(ctx.source_image())
            } else {
                cache.get(name).or_else(|| ctx.named_image(name))
            };
            let Some(image) = image else {
                debug!(cell = %name, "mosaic cell has no image");
                continue;
            };
            let cell = fit_cell(image, cell_w, cell_h);
            imageops::replace(&mut canvas, &cell, c as i64 * cell_w as i64, r as i64 * cell_h as i64);
        }
    }
    Some(DynamicImage::ImageRgb8(canvas))
}

/// Lay images out side by side, every cell sized like the first image.
pub fn build_row(images: &[DynamicImage]) -> Option<DynamicImage> {
    let first = images.first()?;
    let (cell_w, cell_h) = (first.width(), first.height());
    let mut canvas = RgbImage::new(cell_w * images.len() as u32, cell_h);
    for (i, image) in images.iter().enumerate() {
        let cell = fit_cell(image, cell_w, cell_h);
        imageops::replace(&mut canvas, &cell, i as i64 * cell_w as i64, 0);
    }
    Some(DynamicImage::ImageRgb8(canvas))
}
