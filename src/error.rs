//! Error taxonomy for placement requests.
//!
//! Every failure that leaves the dispatcher is one of the variants below.
//! Decoder and serializer errors from `image` and `lopdf` are re-tagged as
//! [`PlacementError::RenderFailure`] so their types never leak to callers.

use serde::Serialize;
use thiserror::Error;

/// Coarse bucket a caller maps to a user-facing response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The request itself is wrong (4xx-equivalent).
    BadInput,
    /// Something broke while rendering (5xx-equivalent).
    Internal,
}

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("missing input: {what}")]
    MissingInput { what: &'static str },

    #[error("invalid value for `{field}`: expected {expected}, got {actual:?}")]
    InvalidPlacementValue {
        field: &'static str,
        expected: &'static str,
        actual: String,
    },

    #[error("degenerate geometry: {what} must be positive, got {value}")]
    DegenerateGeometry { what: &'static str, value: f64 },

    #[error("unsupported artifact kind: {declared:?}")]
    UnsupportedArtifactKind { declared: String },

    #[error("paginated artifact has no pages")]
    EmptyDocument,

    #[error("overlay asset not found: {reference}")]
    AssetNotFound { reference: String },

    #[error("render failure during {stage}: {message}")]
    RenderFailure { stage: &'static str, message: String },
}

impl PlacementError {
    /// Stable snake_case identifier, safe to match on across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingInput { .. } => "missing_input",
            Self::InvalidPlacementValue { .. } => "invalid_placement_value",
            Self::DegenerateGeometry { .. } => "degenerate_geometry",
            Self::UnsupportedArtifactKind { .. } => "unsupported_artifact_kind",
            Self::EmptyDocument => "empty_document",
            Self::AssetNotFound { .. } => "asset_not_found",
            Self::RenderFailure { .. } => "render_failure",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RenderFailure { .. } => ErrorClass::Internal,
            _ => ErrorClass::BadInput,
        }
    }

    pub(crate) fn render(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Self::RenderFailure {
            stage,
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid(field: &'static str, expected: &'static str, actual: impl Into<String>) -> Self {
        Self::InvalidPlacementValue {
            field,
            expected,
            actual: actual.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlacementError>;
