//! Per-producer ingestion state machine.
//!
//! STATES
//! ======
//! - `AwaitingMetadata` (initial): the next message must be a text message
//!   holding valid metadata. Bad metadata is dropped and the state stays put.
//! - `AwaitingImage`: the next message must be binary. It is joined with the
//!   pending metadata into a `Frame` and the state returns to
//!   `AwaitingMetadata`.
//!
//! Any other ordering (text while awaiting an image, binary while awaiting
//! metadata) is a protocol violation. The pending slot is cleared so a stale
//! half-frame can never reach consumers, and the caller closes the socket.
//!
//! The machine is owned by the producer's connection task, so it needs no
//! synchronization.

use axum::body::Bytes;

use crate::frame::{ErrorCode, Frame, Metadata, MetadataError};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed metadata: {0}")]
    MalformedMetadata(#[from] MetadataError),
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
}

impl IngestError {
    /// Fatal errors end the producer connection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_))
    }
}

impl ErrorCode for IngestError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedMetadata(_) => "E_MALFORMED_METADATA",
            Self::ProtocolViolation(_) => "E_PROTOCOL_VIOLATION",
        }
    }
}

#[derive(Debug, Default)]
enum IngestState {
    #[default]
    AwaitingMetadata,
    AwaitingImage(Box<Metadata>),
}

/// Pairs each metadata message with the binary message that follows it.
/// Metadata values, `cam_id` included, are not checked against the
/// handshake; admission is the credential hook's job.
#[derive(Debug, Default)]
pub struct Ingest {
    state: IngestState,
}

impl Ingest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether metadata is parked waiting for its image.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.state, IngestState::AwaitingImage(_))
    }

    /// Feed one text message.
    ///
    /// # Errors
    ///
    /// `MalformedMetadata` if the text does not parse or validate (state
    /// unchanged). `ProtocolViolation` if metadata is already pending
    /// (pending slot discarded).
    pub fn accept_text(&mut self, text: &str) -> Result<(), IngestError> {
        if self.is_pending() {
            self.state = IngestState::AwaitingMetadata;
            return Err(IngestError::ProtocolViolation("metadata received while awaiting image"));
        }

        let meta = Metadata::parse(text)?;
        self.state = IngestState::AwaitingImage(Box::new(meta));
        Ok(())
    }

    /// Feed one binary message, completing the pending frame.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` if no metadata is pending.
    pub fn accept_binary(&mut self, image: Bytes) -> Result<Frame, IngestError> {
        match std::mem::take(&mut self.state) {
            IngestState::AwaitingImage(meta) => Ok(Frame::new(*meta, image)),
            IngestState::AwaitingMetadata => Err(IngestError::ProtocolViolation("image received before metadata")),
        }
    }

    /// Drop any pending metadata, returning it. Used on disconnect.
    pub fn discard(&mut self) -> Option<Metadata> {
        match std::mem::take(&mut self.state) {
            IngestState::AwaitingImage(meta) => Some(*meta),
            IngestState::AwaitingMetadata => None,
        }
    }
}

#[cfg(test)]
#[path = "ingest_test.rs"]
mod tests;
