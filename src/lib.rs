pub mod config;
pub mod error;
pub mod features;
pub mod logging;

pub use config::StampConfig;
pub use error::{ErrorClass, PlacementError};
pub use features::artifact::{Artifact, ArtifactKind, OverlayAsset};
pub use features::dispatch::{classify, stamp, stamp_with, PlacementResult};
pub use features::geometry::{parse_length, PlacementRequest, PreviewGeometry, TargetRect};
pub use features::storage::{DirectoryRepository, MemoryRepository, SignatureRepository, StoreError};

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use features::artifact::decode_data_url;
use jni::objects::{JClass, JString};
use jni::sys::jstring;
use jni::JNIEnv;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{ptr, sync::OnceLock};
use thiserror::Error;
use uuid::Uuid;

/// Command envelope sent by the host. Field names follow the web form the
/// signing page posts (`position_x`, `signature_width`, ...).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Command {
    action: String,
    document_base64: Option<String>,
    document_type: Option<String>,
    signature_base64: Option<String>,
    signature_data_url: Option<String>,
    signature_id: Option<String>,
    position_x: Option<FormValue>,
    position_y: Option<FormValue>,
    signature_width: Option<FormValue>,
    preview_width: Option<FormValue>,
    preview_height: Option<FormValue>,
    page_index: Option<usize>,
}

/// Browsers send lengths as `"120px"`, hosts sometimes as plain numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FormValue {
    Number(f64),
    Text(String),
}

impl FormValue {
    fn as_text(&self) -> String {
        match self {
            FormValue::Number(n) => n.to_string(),
            FormValue::Text(s) => s.clone(),
        }
    }
}

enum OverlaySource {
    Inline(Vec<u8>),
    DataUrl(String),
    Stored(String),
}

enum Action {
    Stamp {
        artifact: Artifact,
        overlay: OverlaySource,
        placement: PlacementRequest,
        preview: Option<PreviewGeometry>,
    },
    SignatureSave {
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid command json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown action {0:?}")]
    UnknownAction(String),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::Json(_) => "invalid_json",
            CommandError::UnknownAction(_) => "unknown_action",
            CommandError::Placement(e) => e.code(),
            CommandError::Store(e) => e.code(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            CommandError::Json(_) | CommandError::UnknownAction(_) => ErrorClass::BadInput,
            CommandError::Placement(e) => e.class(),
            CommandError::Store(StoreError::NotFound(_) | StoreError::InvalidId(_)) => ErrorClass::BadInput,
            CommandError::Store(_) => ErrorClass::Internal,
        }
    }
}

fn parse_action(command: Command) -> Result<Action, CommandError> {
    let Command {
        action,
        document_base64,
        document_type,
        signature_base64,
        signature_data_url,
        signature_id,
        position_x,
        position_y,
        signature_width,
        preview_width,
        preview_height,
        page_index,
    } = command;

    match action.as_str() {
        "stamp" => {
            let document = decode_field("document_base64", document_base64)?
                .ok_or(PlacementError::MissingInput { what: "artifact" })?;
            let artifact = Artifact::new(document, document_type.unwrap_or_default());
            let overlay = if let Some(bytes) = decode_field("signature_base64", signature_base64)? {
                OverlaySource::Inline(bytes)
            } else if let Some(url) = signature_data_url {
                OverlaySource::DataUrl(url)
            } else if let Some(id) = signature_id {
                OverlaySource::Stored(id)
            } else {
                return Err(PlacementError::MissingInput { what: "overlay" }.into());
            };
            let mut placement = PlacementRequest::parse(
                &required_text("position_x", position_x)?,
                &required_text("position_y", position_y)?,
                &required_text("signature_width", signature_width)?,
            )?;
            placement.page_index = page_index;
            let preview = match (preview_width, preview_height) {
                (Some(w), Some(h)) => Some(PreviewGeometry::parse(&w.as_text(), &h.as_text())?),
                (None, None) => None,
                (Some(_), None) => return Err(PlacementError::MissingInput { what: "preview_height" }.into()),
                (None, Some(_)) => return Err(PlacementError::MissingInput { what: "preview_width" }.into()),
            };
            Ok(Action::Stamp {
                artifact,
                overlay,
                placement,
                preview,
            })
        }
        "signature_save" => {
            let bytes = match (decode_field("signature_base64", signature_base64)?, signature_data_url) {
                (Some(bytes), _) => bytes,
                (None, Some(url)) => decode_data_url(&url)?,
                (None, None) => return Err(PlacementError::MissingInput { what: "overlay" }.into()),
            };
            Ok(Action::SignatureSave { bytes })
        }
        other => Err(CommandError::UnknownAction(other.to_string())),
    }
}

fn decode_field(field: &'static str, raw: Option<String>) -> Result<Option<Vec<u8>>, PlacementError> {
    match raw {
        None => Ok(None),
        Some(text) if text.trim().is_empty() => Ok(None),
        Some(text) => B64
            .decode(text.trim().as_bytes())
            .map(Some)
            .map_err(|e| PlacementError::invalid(field, "base64 data", e.to_string())),
    }
}

fn required_text(field: &'static str, value: Option<FormValue>) -> Result<String, PlacementError> {
    value
        .map(|v| v.as_text())
        .ok_or(PlacementError::MissingInput { what: field })
}

/// Run one command against `repo`. Errors are returned, not rendered.
fn handle_command(
    command: Command,
    repo: &dyn SignatureRepository,
    config: &StampConfig,
) -> Result<Value, CommandError> {
    match parse_action(command)? {
        Action::Stamp {
            artifact,
            overlay,
            placement,
            preview,
        } => {
            let overlay = match overlay {
                OverlaySource::Inline(bytes) => OverlayAsset::from_bytes(&bytes)?,
                OverlaySource::DataUrl(url) => OverlayAsset::from_data_url(&url)?,
                OverlaySource::Stored(id) => {
                    let bytes = repo.load(&id).map_err(PlacementError::from)?;
                    OverlayAsset::from_bytes(&bytes)?
                }
            };
            let result = stamp_with(config, &artifact, &overlay, &placement, preview)?;
            let file_name = format!("signed_{}.{}", Uuid::new_v4().simple(), result.kind.extension());
            Ok(json!({
                "status": "ok",
                "file_name": file_name,
                "content_type": result.content_type(),
                "document_base64": B64.encode(&result.bytes),
                "rect": result.rect,
                "page_index": result.page_index,
            }))
        }
        Action::SignatureSave { bytes } => {
            let overlay = OverlayAsset::from_bytes(&bytes)?;
            let id = repo.append(&bytes)?;
            tracing::info!(id = %id, width = overlay.width(), height = overlay.height(), "signature stored");
            Ok(json!({
                "status": "ok",
                "signature_id": id,
                "width": overlay.width(),
                "height": overlay.height(),
            }))
        }
    }
}

/// JSON in, JSON out. Never fails: errors become an error response.
pub fn handle_command_json(input: &str, repo: &dyn SignatureRepository, config: &StampConfig) -> Value {
    let outcome = serde_json::from_str::<Command>(input)
        .map_err(CommandError::from)
        .and_then(|command| handle_command(command, repo, config));
    match outcome {
        Ok(value) => value,
        Err(err) => {
            match err.class() {
                ErrorClass::BadInput => tracing::warn!(code = err.code(), %err, "command rejected"),
                ErrorClass::Internal => tracing::error!(code = err.code(), %err, "command failed"),
            }
            error_response(err.code(), err.class(), &err.to_string())
        }
    }
}

fn error_response(code: &str, class: ErrorClass, message: &str) -> Value {
    json!({
        "status": "error",
        "error": code,
        "class": class,
        "message": message,
    })
}

fn host_repository() -> &'static dyn SignatureRepository {
    static REPO: OnceLock<Box<dyn SignatureRepository>> = OnceLock::new();
    REPO.get_or_init(|| match DirectoryRepository::from_env() {
        Ok(repo) => Box::new(repo),
        Err(err) => {
            tracing::error!(%err, "signature directory unavailable, falling back to memory");
            Box::new(MemoryRepository::new())
        }
    })
    .as_ref()
}

fn host_config() -> &'static StampConfig {
    static CONFIG: OnceLock<StampConfig> = OnceLock::new();
    CONFIG.get_or_init(StampConfig::from_env)
}

/// Turns a panic into an error response. Only the unwinding profiles (dev,
/// android-debug) reach the `Err` arm; release builds set `panic = "abort"`.
fn guarded(run: impl FnOnce() -> Value) -> Value {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(run)) {
        Ok(value) => value,
        Err(_) => error_response("panic", ErrorClass::Internal, "stamping panicked"),
    }
}

#[no_mangle]
pub extern "system" fn Java_io_sigplace_Bridge_dispatch(
    mut env: JNIEnv,
    _class: JClass,
    input: JString,
) -> jstring {
    logging::init_logging();
    let input_str: String = env
        .get_string(&input)
        .map(|s| s.into())
        .unwrap_or_else(|_| "{}".to_string());

    let json_value = guarded(|| handle_command_json(&input_str, host_repository(), host_config()));

    let output_string = json_value.to_string();
    match env.new_string(output_string) {
        Ok(java_str) => java_str.into_raw(),
        Err(_) => {
            let fallback =
                error_response("jni_new_string_failed", ErrorClass::Internal, "could not build response")
                    .to_string();
            env.new_string(fallback)
                .map(|s| s.into_raw())
                .unwrap_or(ptr::null_mut())
        }
    }
}
