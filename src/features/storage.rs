//! Overlay repository owned by the calling layer.
//!
//! The stamping core only ever receives decoded overlays; this module is how
//! the command surface turns a signature id into bytes and stores new ones.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tempfile::NamedTempFile;
use thiserror::Error;
use uuid::Uuid;

use crate::error::PlacementError;

pub const STORE_DIR_ENV: &str = "SIGPLACE_STORE_DIR";

#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(test)]
pub fn test_env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("signature `{0}` not found")]
    NotFound(String),

    #[error("invalid signature id {0:?}")]
    InvalidId(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "asset_not_found",
            StoreError::InvalidId(_) => "invalid_signature_id",
            StoreError::Io(_) => "store_io",
            StoreError::Poisoned => "store_poisoned",
        }
    }
}

impl From<StoreError> for PlacementError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(reference) | StoreError::InvalidId(reference) => {
                PlacementError::AssetNotFound { reference }
            }
            other => PlacementError::render("load_overlay", other),
        }
    }
}

pub trait SignatureRepository: Send + Sync {
    fn load(&self, id: &str) -> Result<Vec<u8>, StoreError>;

    /// Write `bytes` under `id`, replacing any previous content.
    fn save(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Store `bytes` under a fresh id and return it.
    fn append(&self, bytes: &[u8]) -> Result<String, StoreError> {
        let id = new_signature_id();
        self.save(&id, bytes)?;
        Ok(id)
    }
}

pub fn new_signature_id() -> String {
    format!("sig_{}.png", Uuid::new_v4().simple())
}

/// Accept only plain file names: ASCII alphanumerics, `-`, `_` and `.`,
/// no leading dot.
pub fn sanitize_id(id: &str) -> Result<&str, StoreError> {
    let trimmed = id.trim();
    let valid = !trimmed.is_empty()
        && trimmed.len() <= 128
        && !trimmed.starts_with('.')
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(trimmed)
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignatureRepository for MemoryRepository {
    fn load(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        let id = sanitize_id(id)?;
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        entries
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn save(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let id = sanitize_id(id)?;
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(id.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// One file per signature under a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryRepository {
    root: PathBuf,
}

impl DirectoryRepository {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Rooted at `$SIGPLACE_STORE_DIR`, or `signatures/` under the
    /// preferred temp dir.
    pub fn from_env() -> Result<Self, StoreError> {
        match std::env::var(STORE_DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => Self::new(dir),
            _ => Self::new(preferred_temp_dir().join("signatures")),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.root.join(sanitize_id(id)?))
    }
}

impl SignatureRepository for DirectoryRepository {
    fn load(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(id)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(id.trim().to_string())),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Written to a temp file in the same directory, then renamed, so readers
    /// never see a partial signature.
    fn save(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(bytes)?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "signature saved");
        Ok(())
    }
}

pub fn preferred_temp_dir() -> PathBuf {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(tmpdir) = std::env::var("TMPDIR") {
        candidates.push(PathBuf::from(tmpdir));
    }
    candidates.push(std::env::temp_dir());

    for dir in candidates {
        if let Ok(meta) = std::fs::metadata(&dir) {
            if meta.is_dir() {
                return dir;
            }
        }
    }
    std::env::temp_dir()
}
