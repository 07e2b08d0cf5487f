//! Producer credential checks.
//!
//! DESIGN
//! ======
//! The relay does not own an auth policy. It calls a synchronous
//! `CredentialValidator` exactly once per connection attempt, before any
//! frame traffic, and uses the verdict to admit or reject the socket.
//! An accepted verdict may carry camera display info, which is attached to
//! every frame that producer publishes.
//!
//! Two implementations ship with the server:
//! - `AllowAll` when no credentials file is configured.
//! - `StaticCredentials` loaded from a JSON file of token entries.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::frame::ErrorCode;

/// Human-facing camera description surfaced to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub name: String,
    pub location: String,
}

/// Outcome of one credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept { camera: Option<CameraInfo> },
    Reject { reason: String },
}

/// Accept/reject hook invoked once per connection attempt.
///
/// Producers are checked with `validate`. Consumers present no credentials
/// and go through `validate_consumer`, which admits everyone unless an
/// implementation overrides it.
pub trait CredentialValidator: Send + Sync {
    fn validate(&self, token: &str, source_id: &str, cam_id: &str) -> Verdict;

    fn validate_consumer(&self) -> Verdict {
        Verdict::Accept { camera: None }
    }
}

/// Admits every producer. Used when no credential store is configured.
pub struct AllowAll;

impl CredentialValidator for AllowAll {
    fn validate(&self, _token: &str, _source_id: &str, _cam_id: &str) -> Verdict {
        Verdict::Accept { camera: None }
    }
}

// =============================================================================
// STATIC CREDENTIALS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("failed to read credentials file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse credentials file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate token in credentials file")]
    DuplicateToken,
}

impl ErrorCode for CredentialsError {
    fn error_code(&self) -> &'static str {
        "E_CREDENTIALS"
    }
}

/// One token grant. `source_id` is optional: when absent any source may use
/// the token, as long as the camera matches.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialEntry {
    pub token: String,
    pub cam_id: String,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub camera: Option<CameraInfo>,
}

/// In-memory token table keyed by token.
pub struct StaticCredentials {
    entries: HashMap<String, CredentialEntry>,
}

impl StaticCredentials {
    /// Build from a list of entries.
    ///
    /// # Errors
    ///
    /// Returns `CredentialsError::DuplicateToken` if two entries share a token.
    pub fn from_entries(entries: Vec<CredentialEntry>) -> Result<Self, CredentialsError> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if map.insert(entry.token.clone(), entry).is_some() {
                return Err(CredentialsError::DuplicateToken);
            }
        }
        Ok(Self { entries: map })
    }

    /// Load a JSON array of `CredentialEntry` from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, CredentialsError> {
        let raw = std::fs::read_to_string(path)?;
        let entries: Vec<CredentialEntry> = serde_json::from_str(&raw)?;
        Self::from_entries(entries)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialValidator for StaticCredentials {
    fn validate(&self, token: &str, source_id: &str, cam_id: &str) -> Verdict {
        let Some(entry) = self.entries.get(token) else {
            return Verdict::Reject { reason: "unknown token".into() };
        };
        if entry.cam_id != cam_id {
            return Verdict::Reject { reason: "token not valid for cam_id".into() };
        }
        if entry.source_id.as_deref().is_some_and(|expected| expected != source_id) {
            return Verdict::Reject { reason: "token not valid for source_id".into() };
        }
        Verdict::Accept { camera: entry.camera.clone() }
    }
}
