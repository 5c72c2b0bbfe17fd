use image::imageops::FilterType;
use serde::Deserialize;

use crate::features::geometry::PreviewGeometry;

/// Preview viewport assumed when a caller does not send one.
///
/// Mapping depends on the preview size, so a client whose real viewport is
/// not 800x600 gets a silently shifted placement if it omits the geometry.
pub const DEFAULT_PREVIEW_WIDTH: f64 = 800.0;
pub const DEFAULT_PREVIEW_HEIGHT: f64 = 600.0;

/// A4 portrait in points.
pub const FALLBACK_PAGE_SIZE: (f64, f64) = (595.0, 842.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl ResizeFilter {
    pub fn filter_type(self) -> FilterType {
        match self {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StampConfig {
    pub default_preview: PreviewGeometry,
    /// 0-based; 0 stamps the first page.
    pub default_page_index: usize,
    pub fallback_page_size: (f64, f64),
    pub compress_images: bool,
    pub resize_filter: ResizeFilter,
}

impl Default for StampConfig {
    fn default() -> Self {
        Self {
            default_preview: PreviewGeometry::default(),
            default_page_index: 0,
            fallback_page_size: FALLBACK_PAGE_SIZE,
            compress_images: true,
            resize_filter: ResizeFilter::Lanczos3,
        }
    }
}

impl StampConfig {
    /// Defaults overridden by `SIGPLACE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let width = env_parse::<f64>(&lookup, "SIGPLACE_PREVIEW_WIDTH");
        let height = env_parse::<f64>(&lookup, "SIGPLACE_PREVIEW_HEIGHT");
        if width.is_some() || height.is_some() {
            let w = width.unwrap_or(config.default_preview.width);
            let h = height.unwrap_or(config.default_preview.height);
            match PreviewGeometry::new(w, h) {
                Ok(preview) => config.default_preview = preview,
                Err(err) => tracing::warn!(%err, "ignoring preview override"),
            }
        }
        if let Some(index) = env_parse::<usize>(&lookup, "SIGPLACE_PAGE_INDEX") {
            config.default_page_index = index;
        }
        if let Some(compress) = env_parse::<bool>(&lookup, "SIGPLACE_COMPRESS_IMAGES") {
            config.compress_images = compress;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable config override");
            None
        }
    }
}
