//! Entry point for placement requests.
//!
//! Classifies the artifact once, maps the placement with the policy that
//! belongs to its kind and hands off to the raster compositor or the page
//! stamper. Either a complete output comes back or a [`PlacementError`].

use serde::Serialize;

use crate::config::StampConfig;
use crate::error::{PlacementError, Result};
use crate::features::artifact::{Artifact, ArtifactKind, OverlayAsset};
use crate::features::geometry::{PlacementRequest, PreviewGeometry, TargetRect};
use crate::features::mapper::{map_placement, PlacementPolicy};
use crate::features::pdf::PageTarget;
use crate::features::raster::RasterTarget;

const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, Serialize)]
pub struct PlacementResult {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub kind: ArtifactKind,
    pub rect: TargetRect,
    /// Page that received the overlay; `None` for rasters.
    pub page_index: Option<usize>,
}

impl PlacementResult {
    pub fn content_type(&self) -> &'static str {
        self.kind.output_mime()
    }
}

/// Resolve the declared type to a kind. Blank or generic declarations fall
/// back to sniffing the payload.
pub fn classify(artifact: &Artifact) -> Result<ArtifactKind> {
    let declared = artifact.declared_type().trim();
    if declared.is_empty() || declared.eq_ignore_ascii_case(OCTET_STREAM) {
        let sniffed = infer::get(artifact.bytes()).map(|t| t.mime_type());
        tracing::debug!(declared, ?sniffed, "sniffing undeclared artifact");
        return sniffed
            .and_then(ArtifactKind::from_mime)
            .ok_or_else(|| PlacementError::UnsupportedArtifactKind {
                declared: sniffed.unwrap_or(if declared.is_empty() { "unknown" } else { declared }).to_string(),
            });
    }
    ArtifactKind::from_mime(declared).ok_or_else(|| PlacementError::UnsupportedArtifactKind {
        declared: declared.to_string(),
    })
}

/// Stamp with default configuration. Omitting `preview` applies the 800x600
/// default viewport.
pub fn stamp(
    artifact: &Artifact,
    overlay: &OverlayAsset,
    placement: &PlacementRequest,
    preview: Option<PreviewGeometry>,
) -> Result<PlacementResult> {
    stamp_with(&StampConfig::default(), artifact, overlay, placement, preview)
}

pub fn stamp_with(
    config: &StampConfig,
    artifact: &Artifact,
    overlay: &OverlayAsset,
    placement: &PlacementRequest,
    preview: Option<PreviewGeometry>,
) -> Result<PlacementResult> {
    if artifact.is_empty() {
        return Err(PlacementError::MissingInput { what: "artifact" });
    }
    if overlay.width() == 0 || overlay.height() == 0 {
        return Err(PlacementError::MissingInput { what: "overlay" });
    }
    let kind = classify(artifact)?;
    let preview = preview.unwrap_or_else(|| {
        tracing::warn!(
            width = config.default_preview.width,
            height = config.default_preview.height,
            "preview geometry omitted, using default viewport"
        );
        config.default_preview
    });
    preview.validate()?;
    placement.validate()?;

    let _span = tracing::debug_span!("stamp", ?kind, bytes = artifact.bytes().len()).entered();
    let policy = PlacementPolicy::from(kind);
    let result = match kind {
        ArtifactKind::Raster => {
            let target = RasterTarget::decode(artifact.bytes())?;
            let mapped = map_placement(policy, &preview, placement, overlay.size(), target.size())?;
            let bytes = target.composite(overlay, &mapped, config.resize_filter.filter_type())?;
            PlacementResult {
                bytes,
                kind,
                rect: mapped.rect(),
                page_index: None,
            }
        }
        ArtifactKind::Paginated => {
            let requested = placement.page_index.unwrap_or(config.default_page_index);
            let target = PageTarget::load(artifact.bytes(), requested, config.fallback_page_size)?;
            let page_index = target.page_index();
            let mapped = map_placement(policy, &preview, placement, overlay.size(), target.size())?;
            let bytes = target.stamp(overlay, &mapped, config.compress_images)?;
            PlacementResult {
                bytes,
                kind,
                rect: mapped.rect(),
                page_index: Some(page_index),
            }
        }
    };

    if result.bytes.is_empty() {
        return Err(PlacementError::render("finish", "empty output"));
    }
    tracing::info!(
        ?kind,
        x0 = result.rect.x0,
        y0 = result.rect.y0,
        x1 = result.rect.x1,
        y1 = result.rect.y1,
        output_bytes = result.bytes.len(),
        "artifact stamped"
    );
    Ok(result)
}
