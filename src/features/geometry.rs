//! Geometry shared by the mapper and both compositors.
//!
//! Preview space is top-left anchored and measured in preview pixels. Target
//! space is the artifact's native unit: pixels for rasters, points for pages,
//! also top-left anchored (the page stamper flips to PDF's bottom-left origin).

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_PREVIEW_HEIGHT, DEFAULT_PREVIEW_WIDTH};
use crate::error::{PlacementError, Result};

const LENGTH_EXPECTED: &str = "a finite number with optional `px` suffix";

/// Parse a form length such as `"120px"`, `" 42.5 "` or `"-3"`.
pub fn parse_length(field: &'static str, raw: &str) -> Result<f64> {
    let trimmed = raw.trim();
    let number = match trimmed.len().checked_sub(2) {
        Some(split) if trimmed.is_char_boundary(split) && trimmed[split..].eq_ignore_ascii_case("px") => {
            trimmed[..split].trim_end()
        }
        _ => trimmed,
    };
    if number.is_empty() {
        return Err(PlacementError::invalid(field, LENGTH_EXPECTED, raw));
    }
    let value = number
        .parse::<f64>()
        .map_err(|_| PlacementError::invalid(field, LENGTH_EXPECTED, raw))?;
    if !value.is_finite() {
        return Err(PlacementError::invalid(field, LENGTH_EXPECTED, raw));
    }
    Ok(value)
}

/// On-screen viewport the user placed the overlay in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreviewGeometry {
    pub width: f64,
    pub height: f64,
}

impl Default for PreviewGeometry {
    /// 800x600. Callers that omit the real preview size get this silently.
    fn default() -> Self {
        Self {
            width: DEFAULT_PREVIEW_WIDTH,
            height: DEFAULT_PREVIEW_HEIGHT,
        }
    }
}

impl PreviewGeometry {
    pub fn new(width: f64, height: f64) -> Result<Self> {
        let preview = Self { width, height };
        preview.validate()?;
        Ok(preview)
    }

    pub fn parse(width: &str, height: &str) -> Result<Self> {
        Self::new(
            parse_length("preview_width", width)?,
            parse_length("preview_height", height)?,
        )
    }

    pub fn validate(&self) -> Result<()> {
        positive("preview width", self.width)?;
        positive("preview height", self.height)
    }
}

/// Where the user dropped the overlay, in preview pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub x: f64,
    pub y: f64,
    pub overlay_width: f64,
    /// 0-based page to stamp on paginated targets. `None` uses the
    /// configured default, which is the first page.
    #[serde(default)]
    pub page_index: Option<usize>,
}

impl PlacementRequest {
    pub fn new(x: f64, y: f64, overlay_width: f64) -> Result<Self> {
        let request = Self {
            x,
            y,
            overlay_width,
            page_index: None,
        };
        request.validate()?;
        Ok(request)
    }

    /// Build from raw form values (`position_x`, `position_y`, `signature_width`).
    pub fn parse(x: &str, y: &str, overlay_width: &str) -> Result<Self> {
        Self::new(
            parse_length("position_x", x)?,
            parse_length("position_y", y)?,
            parse_length("signature_width", overlay_width)?,
        )
    }

    pub fn on_page(mut self, page_index: usize) -> Self {
        self.page_index = Some(page_index);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.x.is_finite() {
            return Err(PlacementError::invalid("position_x", LENGTH_EXPECTED, self.x.to_string()));
        }
        if !self.y.is_finite() {
            return Err(PlacementError::invalid("position_y", LENGTH_EXPECTED, self.y.to_string()));
        }
        if !self.overlay_width.is_finite() || self.overlay_width <= 0.0 {
            return Err(PlacementError::invalid(
                "signature_width",
                "a positive finite width",
                self.overlay_width.to_string(),
            ));
        }
        Ok(())
    }
}

/// Width and height in some coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Resolved rectangle in target space, always inside the target bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TargetRect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl TargetRect {
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn is_within(&self, bounds: Size) -> bool {
        0.0 <= self.x0
            && self.x0 <= self.x1
            && self.x1 <= bounds.width
            && 0.0 <= self.y0
            && self.y0 <= self.y1
            && self.y1 <= bounds.height
    }
}

pub(crate) fn positive(what: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PlacementError::DegenerateGeometry { what, value })
    }
}
