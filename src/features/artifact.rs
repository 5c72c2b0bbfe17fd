use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use image::RgbaImage;
use serde::Serialize;

use crate::error::{PlacementError, Result};
use crate::features::geometry::Size;

/// The two target families. Everything past the dispatcher branches on this
/// tag, never on a mime string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Raster,
    Paginated,
}

impl ArtifactKind {
    /// Classify a mime type, ignoring parameters and case.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/png" | "image/jpeg" | "image/jpg" | "image/webp" => Some(ArtifactKind::Raster),
            "application/pdf" => Some(ArtifactKind::Paginated),
            _ => None,
        }
    }

    /// Rasters always come back as PNG whatever they were encoded as.
    pub fn output_mime(self) -> &'static str {
        match self {
            ArtifactKind::Raster => "image/png",
            ArtifactKind::Paginated => "application/pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Raster => "png",
            ArtifactKind::Paginated => "pdf",
        }
    }
}

/// Document or image to be stamped, as received. Never mutated.
#[derive(Debug, Clone)]
pub struct Artifact {
    bytes: Vec<u8>,
    declared_type: String,
}

impl Artifact {
    pub fn new(bytes: Vec<u8>, declared_type: impl Into<String>) -> Self {
        Self {
            bytes,
            declared_type: declared_type.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Decoded signature bitmap. Cheap to share by reference across placements.
#[derive(Clone)]
pub struct OverlayAsset {
    image: RgbaImage,
}

impl std::fmt::Debug for OverlayAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayAsset")
            .field("dimensions", &(self.image.width(), self.image.height()))
            .finish()
    }
}

impl OverlayAsset {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(PlacementError::MissingInput { what: "overlay" });
        }
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| PlacementError::render("decode_overlay", e))?;
        Self::from_image(decoded.to_rgba8())
    }

    /// Accepts the `data:image/png;base64,...` form a canvas produces.
    pub fn from_data_url(url: &str) -> Result<Self> {
        Self::from_bytes(&decode_data_url(url)?)
    }

    pub fn from_image(image: RgbaImage) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(PlacementError::DegenerateGeometry {
                what: "overlay size",
                value: 0.0,
            });
        }
        Ok(Self { image })
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> Size {
        Size::new(self.width() as f64, self.height() as f64)
    }

    /// Height over width.
    pub fn aspect_ratio(&self) -> f64 {
        self.height() as f64 / self.width() as f64
    }
}

/// Payload bytes of a base64 `data:` URL.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>> {
    const EXPECTED: &str = "a base64 `data:` URL";
    let (header, encoded) = url
        .trim()
        .split_once(',')
        .ok_or_else(|| PlacementError::invalid("signature_data_url", EXPECTED, truncate(url)))?;
    if !header.starts_with("data:") || !header.ends_with(";base64") {
        return Err(PlacementError::invalid("signature_data_url", EXPECTED, truncate(header)));
    }
    B64.decode(encoded.trim().as_bytes())
        .map_err(|e| PlacementError::invalid("signature_data_url", EXPECTED, e.to_string()))
}

fn truncate(raw: &str) -> String {
    raw.chars().take(48).collect()
}
