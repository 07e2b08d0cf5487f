//! Connection handshake: query parameters to a typed role.
//!
//! External clients name their role `pi` (producer) or `viewer` (consumer).
//! Producers must also supply `source_id`, `cam_id` and `token`. Anything
//! else fails the connection before frame traffic is accepted.

use std::collections::HashMap;

use crate::frame::ErrorCode;

pub const PARAM_ROLE: &str = "role";
pub const PARAM_SOURCE_ID: &str = "source_id";
pub const PARAM_CAM_ID: &str = "cam_id";
pub const PARAM_TOKEN: &str = "token";

const ROLE_PRODUCER: &str = "pi";
const ROLE_CONSUMER: &str = "viewer";

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("role required")]
    MissingRole,
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("{0} required for role=pi")]
    MissingParam(&'static str),
    #[error("credentials rejected: {0}")]
    Rejected(String),
    #[error("relay is shutting down")]
    Closed,
}

impl ErrorCode for HandshakeError {
    fn error_code(&self) -> &'static str {
        "E_HANDSHAKE_REJECTED"
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Identity a producer declares at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerParams {
    pub source_id: String,
    pub cam_id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Producer(ProducerParams),
    Consumer,
}

/// Classify a connection attempt from its query parameters.
///
/// # Errors
///
/// Returns a `HandshakeError` for a missing or unknown role, or a producer
/// missing one of its required parameters. Empty values count as missing.
pub fn parse_role(params: &HashMap<String, String>) -> Result<Role, HandshakeError> {
    let role = non_empty(params, PARAM_ROLE).ok_or(HandshakeError::MissingRole)?;
    match role {
        ROLE_CONSUMER => Ok(Role::Consumer),
        ROLE_PRODUCER => {
            let source_id = required(params, PARAM_SOURCE_ID)?;
            let cam_id = required(params, PARAM_CAM_ID)?;
            let token = required(params, PARAM_TOKEN)?;
            Ok(Role::Producer(ProducerParams { source_id, cam_id, token }))
        }
        other => Err(HandshakeError::UnknownRole(other.to_owned())),
    }
}

fn non_empty<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn required(params: &HashMap<String, String>, key: &'static str) -> Result<String, HandshakeError> {
    non_empty(params, key)
        .map(str::to_owned)
        .ok_or(HandshakeError::MissingParam(key))
}
