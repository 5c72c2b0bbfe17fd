//! Preview-space to target-space placement.
//!
//! Two policies, one per artifact kind:
//!
//! - [`PlacementPolicy::FitToViewport`] for pages: the page is shown in the
//!   preview with uniform "contain" scaling and centred, so the inverse map
//!   removes the letterbox offsets and divides by one scale.
//! - [`PlacementPolicy::IndependentAxis`] for rasters: the image is assumed to
//!   fill the preview exactly, so x and y scale independently. The overlay
//!   height follows the overlay's own aspect ratio at the scaled width, not
//!   the vertical scale.
//!
//! Both finish by pinning the origin inside the target. An overlay larger
//! than the target stays at full size with its origin at 0; the compositor
//! crops whatever hangs past the right or bottom edge.

use serde::Serialize;

use crate::error::Result;
use crate::features::artifact::ArtifactKind;
use crate::features::geometry::{positive, PlacementRequest, PreviewGeometry, Size, TargetRect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicy {
    FitToViewport,
    IndependentAxis,
}

impl From<ArtifactKind> for PlacementPolicy {
    fn from(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::Paginated => PlacementPolicy::FitToViewport,
            ArtifactKind::Raster => PlacementPolicy::IndependentAxis,
        }
    }
}

/// Overlay geometry in target space. `width`/`height` are the full overlay
/// extent, which may run past `bounds`; [`MappedPlacement::rect`] is the
/// visible part.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MappedPlacement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub bounds: Size,
}

impl MappedPlacement {
    pub fn rect(&self) -> TargetRect {
        TargetRect {
            x0: self.x,
            y0: self.y,
            x1: (self.x + self.width).min(self.bounds.width),
            y1: (self.y + self.height).min(self.bounds.height),
        }
    }
}

/// Contain-fit of `content` inside `viewport`: uniform scale plus the
/// centring offsets of the letterbox.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportFit {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl ViewportFit {
    pub fn contain(viewport: &PreviewGeometry, content: Size) -> Result<Self> {
        viewport.validate()?;
        positive("target width", content.width)?;
        positive("target height", content.height)?;
        let scale = (viewport.width / content.width).min(viewport.height / content.height);
        positive("scale", scale)?;
        Ok(Self {
            scale,
            offset_x: (viewport.width - content.width * scale) / 2.0,
            offset_y: (viewport.height - content.height * scale) / 2.0,
        })
    }
}

pub fn map_placement(
    policy: PlacementPolicy,
    preview: &PreviewGeometry,
    placement: &PlacementRequest,
    overlay: Size,
    target: Size,
) -> Result<MappedPlacement> {
    placement.validate()?;
    positive("overlay width", overlay.width)?;
    positive("overlay height", overlay.height)?;
    let mapped = match policy {
        PlacementPolicy::FitToViewport => {
            fit_to_viewport(preview, placement, overlay.height / overlay.width, target)?
        }
        PlacementPolicy::IndependentAxis => independent_axis(preview, placement, overlay, target)?,
    };
    tracing::debug!(
        ?policy,
        x = mapped.x,
        y = mapped.y,
        width = mapped.width,
        height = mapped.height,
        "placement mapped to target space"
    );
    Ok(mapped)
}

/// Inverse of the contain-fit preview; `aspect` is overlay height / width.
pub fn fit_to_viewport(
    preview: &PreviewGeometry,
    placement: &PlacementRequest,
    aspect: f64,
    page: Size,
) -> Result<MappedPlacement> {
    let fit = ViewportFit::contain(preview, page)?;
    let x = (placement.x - fit.offset_x) / fit.scale;
    let y = (placement.y - fit.offset_y) / fit.scale;
    let width = placement.overlay_width / fit.scale;
    let height = width * aspect;
    Ok(pin(x, y, width, height, page))
}

/// Per-axis scaling for rasters. Results are whole pixels.
pub fn independent_axis(
    preview: &PreviewGeometry,
    placement: &PlacementRequest,
    overlay: Size,
    target: Size,
) -> Result<MappedPlacement> {
    preview.validate()?;
    positive("target width", target.width)?;
    positive("target height", target.height)?;
    let scale_x = target.width / preview.width;
    let scale_y = target.height / preview.height;
    positive("horizontal scale", scale_x)?;
    positive("vertical scale", scale_y)?;

    let width = (placement.overlay_width * scale_x).round().max(1.0);
    let height = (width * overlay.height / overlay.width).round().max(1.0);
    let x = (placement.x * scale_x).round();
    let y = (placement.y * scale_y).round();
    Ok(pin(x, y, width, height, target))
}

fn pin(x: f64, y: f64, width: f64, height: f64, bounds: Size) -> MappedPlacement {
    MappedPlacement {
        x: clamp_origin(x, width, bounds.width),
        y: clamp_origin(y, height, bounds.height),
        width,
        height,
        bounds,
    }
}

/// `max(0, min(origin, bound - extent))`; a negative upper bound pins to 0.
fn clamp_origin(origin: f64, extent: f64, bound: f64) -> f64 {
    origin.min(bound - extent).max(0.0)
}
