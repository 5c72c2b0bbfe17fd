//! Alpha compositing of the overlay onto raster targets.
//!
//! The canvas is copied, the overlay resized to the mapped extent and blended
//! over the visible intersection only. Output is always PNG.

use std::borrow::Cow;
use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};

use crate::error::{PlacementError, Result};
use crate::features::artifact::OverlayAsset;
use crate::features::geometry::Size;
use crate::features::mapper::MappedPlacement;

/// Upper bound on the resized overlay, in pixels.
const MAX_OVERLAY_PIXELS: u64 = 64 * 1024 * 1024;

pub struct RasterTarget {
    canvas: RgbaImage,
}

impl RasterTarget {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let canvas = image::load_from_memory(bytes)
            .map_err(|e| PlacementError::render("decode_canvas", e))?
            .to_rgba8();
        Ok(Self { canvas })
    }

    pub fn size(&self) -> Size {
        Size::new(self.canvas.width() as f64, self.canvas.height() as f64)
    }

    /// Blend `overlay` at `placement` and encode the result as PNG.
    pub fn composite(
        &self,
        overlay: &OverlayAsset,
        placement: &MappedPlacement,
        filter: FilterType,
    ) -> Result<Vec<u8>> {
        let width = placement.width as u32;
        let height = placement.height as u32;
        if width as u64 * height as u64 > MAX_OVERLAY_PIXELS {
            return Err(PlacementError::invalid(
                "signature_width",
                "an overlay of at most 64 megapixels once scaled",
                format!("{width}x{height}"),
            ));
        }
        let scaled = scale_overlay(overlay.image(), width, height, filter);
        let stamped = composite_over(&self.canvas, &scaled, placement.x as i64, placement.y as i64);
        encode_png(&stamped)
    }
}

/// Resample in premultiplied space so fully transparent pixels carry no
/// colour into the ink at stroke edges.
pub fn scale_overlay(overlay: &RgbaImage, width: u32, height: u32, filter: FilterType) -> Cow<'_, RgbaImage> {
    if overlay.dimensions() == (width, height) {
        return Cow::Borrowed(overlay);
    }
    let mut premultiplied = overlay.clone();
    for pixel in premultiplied.pixels_mut() {
        let a = pixel[3] as u32;
        for c in 0..3 {
            pixel[c] = ((pixel[c] as u32 * a + 127) / 255) as u8;
        }
    }
    let mut scaled = imageops::resize(&premultiplied, width.max(1), height.max(1), filter);
    for pixel in scaled.pixels_mut() {
        let a = pixel[3] as u32;
        for c in 0..3 {
            pixel[c] = match a {
                0 => 0,
                _ => ((pixel[c] as u32 * 255 + a / 2) / a).min(255) as u8,
            };
        }
    }
    Cow::Owned(scaled)
}

/// Copy `canvas` and blend `overlay` with its top-left at (`x`, `y`).
/// Parts of the overlay outside the canvas are dropped.
pub fn composite_over(canvas: &RgbaImage, overlay: &RgbaImage, x: i64, y: i64) -> RgbaImage {
    let mut out = canvas.clone();

    let x_start = x.max(0);
    let y_start = y.max(0);
    let x_end = (x + overlay.width() as i64).min(canvas.width() as i64);
    let y_end = (y + overlay.height() as i64).min(canvas.height() as i64);

    for ty in y_start..y_end {
        for tx in x_start..x_end {
            let over = overlay.get_pixel((tx - x) as u32, (ty - y) as u32);
            let under = out.get_pixel(tx as u32, ty as u32);
            let blended = blend_pixel(*under, *over);
            out.put_pixel(tx as u32, ty as u32, blended);
        }
    }
    out
}

/// `out = over * a + under * (1 - a)` per colour channel, with `a` the
/// overlay alpha. Canvas alpha accumulates with the "over" operator.
fn blend_pixel(under: Rgba<u8>, over: Rgba<u8>) -> Rgba<u8> {
    let a = over[3] as u32;
    if a == 0 {
        return under;
    }
    if a == 255 {
        return over;
    }
    let inv = 255 - a;
    let mix = |o: u8, u: u8| ((o as u32 * a + u as u32 * inv + 127) / 255) as u8;
    Rgba([
        mix(over[0], under[0]),
        mix(over[1], under[1]),
        mix(over[2], under[2]),
        (a + (under[3] as u32 * inv + 127) / 255) as u8,
    ])
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .map_err(|e| PlacementError::render("encode_png", e))?;
    Ok(buf)
}
