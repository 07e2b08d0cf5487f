//! Frame: the unit the relay joins and fans out.
//!
//! ARCHITECTURE
//! ============
//! A producer publishes one frame as two websocket messages:
//! 1. a UTF-8 JSON text message carrying the frame metadata, then
//! 2. one binary message carrying the raw JPEG bytes.
//!
//! The transport message type (text vs. binary) is the ONLY signal that
//! separates the two. Content is never sniffed: a binary message that happens
//! to contain JSON is still an image, and a text message is always metadata.
//!
//! DESIGN
//! ======
//! - Metadata is validated against a typed record (`FrameMeta`) but the
//!   producer's original JSON object is what consumers receive, so unknown
//!   fields and float formatting pass through untouched.
//! - `timestamp` must be an RFC 3339 instant in UTC (`2025-03-01T10:20:30Z`,
//!   fractional seconds allowed). That is the extended ISO-8601 profile; the
//!   basic form `20250301T102030Z` and local offsets are refused.
//! - Consumers receive one `FrameEnvelope` text message per frame:
//!   `{"kind":"frame","meta":{..},"image_jpeg_base64":".."}`.

use axum::body::Bytes;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::credentials::CameraInfo;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Envelope discriminant for relayed frames.
pub const KIND_FRAME: &str = "frame";

/// Envelope discriminant for diagnostics echoed to a producer.
pub const KIND_ERROR: &str = "error";

/// Metadata key holding credential-derived context added by the relay.
pub const META_TOKEN_ID: &str = "token_id";

/// Key under `token_id` holding camera display info.
pub const META_CAMERA_INFO: &str = "camera_info";

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured diagnostics.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Why a metadata text message was refused.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("invalid json: {0}")]
    Json(#[source] serde_json::Error),
    #[error("metadata must be a json object")]
    NotAnObject,
    #[error("schema mismatch: {0}")]
    Schema(#[source] serde_json::Error),
    #[error("timestamp must be an RFC 3339 instant ending in 'Z' (ISO-8601 basic format is not accepted), got {0:?}")]
    Timestamp(String),
}

impl ErrorCode for MetadataError {
    fn error_code(&self) -> &'static str {
        "E_MALFORMED_METADATA"
    }
}

// =============================================================================
// METADATA RECORD
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
}

/// One detection reported alongside a frame. Values pass through uninterpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub obj_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub lat: f64,
    pub lng: f64,
    pub alt: f64,
    pub speed_kt: f64,
}

/// Typed view of the producer's metadata message. Field names are an
/// external contract and are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub fram_id: String,
    pub cam_id: String,
    pub timestamp: String,
    pub image_info: ImageInfo,
    pub objects: Vec<DetectedObject>,
}

/// Validated metadata: the typed record plus the exact object it came from.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub record: FrameMeta,
    pub raw: Map<String, Value>,
}

impl Metadata {
    /// Parse and validate one metadata text message.
    ///
    /// # Errors
    ///
    /// Returns a `MetadataError` if the text is not JSON, not an object,
    /// does not match the metadata schema, or carries a bad timestamp.
    pub fn parse(text: &str) -> Result<Self, MetadataError> {
        let value: Value = serde_json::from_str(text).map_err(MetadataError::Json)?;
        if !value.is_object() {
            return Err(MetadataError::NotAnObject);
        }

        let record = FrameMeta::deserialize(&value).map_err(MetadataError::Schema)?;
        let Value::Object(raw) = value else {
            return Err(MetadataError::NotAnObject);
        };

        validate_timestamp(&record.timestamp)?;
        Ok(Self { record, raw })
    }
}

fn validate_timestamp(ts: &str) -> Result<(), MetadataError> {
    if !ts.ends_with('Z') || OffsetDateTime::parse(ts, &Rfc3339).is_err() {
        return Err(MetadataError::Timestamp(ts.to_owned()));
    }
    Ok(())
}

// =============================================================================
// JOINED FRAME
// =============================================================================

/// One metadata message joined with the binary payload that followed it.
/// Built by the ingest state machine, serialized once, then dropped.
#[derive(Debug, Clone)]
pub struct Frame {
    pub meta: Metadata,
    pub image: Bytes,
}

impl Frame {
    #[must_use]
    pub fn new(meta: Metadata, image: Bytes) -> Self {
        Self { meta, image }
    }

    #[must_use]
    pub fn fram_id(&self) -> &str {
        &self.meta.record.fram_id
    }

    #[must_use]
    pub fn cam_id(&self) -> &str {
        &self.meta.record.cam_id
    }

    /// Build the consumer-facing envelope, attaching camera display info
    /// under `meta.token_id.camera_info` when the credential check supplied it.
    #[must_use]
    pub fn into_envelope(self, camera: Option<&CameraInfo>) -> FrameEnvelope {
        let mut meta = self.meta.raw;
        if let Some(camera) = camera {
            let token_id = meta
                .entry(META_TOKEN_ID)
                .or_insert_with(|| Value::Object(Map::new()));
            if !token_id.is_object() {
                *token_id = Value::Object(Map::new());
            }
            if let Value::Object(token_id) = token_id {
                token_id.insert(
                    META_CAMERA_INFO.into(),
                    serde_json::json!({ "name": camera.name, "location": camera.location }),
                );
            }
        }

        FrameEnvelope {
            kind: KIND_FRAME.into(),
            meta,
            image_jpeg_base64: STANDARD.encode(&self.image),
        }
    }
}

// =============================================================================
// OUTBOUND MESSAGES
// =============================================================================

/// The single JSON message every consumer receives per relayed frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameEnvelope {
    pub kind: String,
    pub meta: Map<String, Value>,
    pub image_jpeg_base64: String,
}

/// Diagnostic text message echoed to a producer for non-fatal errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: String,
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl Diagnostic {
    #[must_use]
    pub fn from_error(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self {
            kind: KIND_ERROR.into(),
            code: err.error_code().into(),
            message: err.to_string(),
            retryable: err.retryable(),
        }
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
