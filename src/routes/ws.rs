//! WebSocket handler: producer ingest and consumer fan-out.
//!
//! DESIGN
//! ======
//! On upgrade, the query string is classified into a role and checked once
//! against the credential hook (producers by token, consumers by the
//! consumer-side hook). Rejected attempts
//! are still upgraded so the client receives a close frame with a reason.
//!
//! - Producers run a receive loop feeding the per-connection `Ingest`
//!   state machine. Completed frames go straight to `Hub::broadcast`.
//! - Consumers run a `select!` loop: frames from their hub queue are
//!   forwarded to the socket, inbound messages are ignored.
//!
//! Every error is connection-local. Nothing here can touch another
//! connection's socket or the hub's broadcast set beyond its own entry.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → role + credential check (reject → close 1008)
//! 2. Producer: metadata text → binary image → broadcast, repeat
//!    (malformed metadata → diagnostic, out-of-order → close 1002)
//! 3. Consumer: receive envelopes until disconnect or hub shutdown (1001)
//!    Producers are also closed with 1001 on hub shutdown
//! 4. Close → pending metadata discarded / consumer removed

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::credentials::{CameraInfo, Verdict};
use crate::frame::{Diagnostic, ErrorCode, Frame};
use crate::handshake::{self, HandshakeError, ProducerParams, Role};
use crate::ingest::{Ingest, IngestError};
use crate::state::AppState;

/// Close reasons are capped at 123 bytes by the websocket protocol.
const MAX_CLOSE_REASON: usize = 123;

const SHUTDOWN_REASON: &str = "relay shutting down";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    Socket(#[from] axum::Error),
    #[error("send timed out after {0:?}")]
    SendTimeout(Duration),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ErrorCode for TransportError {
    fn error_code(&self) -> &'static str {
        "E_TRANSPORT"
    }

    fn retryable(&self) -> bool {
        !matches!(self, Self::Encode(_))
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

enum Admission {
    Producer { params: ProducerParams, camera: Option<CameraInfo> },
    Consumer,
}

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let session_id = Uuid::new_v4();
    let admission = admit(&state, &params);
    let max_message_bytes = state.config.max_message_bytes;

    ws.max_message_size(max_message_bytes)
        .on_upgrade(move |socket| async move {
            match admission {
                Ok(Admission::Producer { params, camera }) => run_producer(socket, state, session_id, params, camera).await,
                Ok(Admission::Consumer) => run_consumer(socket, state, session_id).await,
                Err(e) => {
                    warn!(%session_id, code = e.error_code(), error = %e, "ws: handshake rejected");
                    reject(socket, &e).await;
                }
            }
        })
}

/// Classify the connection and run the credential hook exactly once.
fn admit(state: &AppState, params: &HashMap<String, String>) -> Result<Admission, HandshakeError> {
    if state.hub.is_closed() {
        return Err(HandshakeError::Closed);
    }

    match handshake::parse_role(params)? {
        Role::Consumer => match state.credentials.validate_consumer() {
            Verdict::Accept { .. } => Ok(Admission::Consumer),
            Verdict::Reject { reason } => Err(HandshakeError::Rejected(reason)),
        },
        Role::Producer(params) => match state.credentials.validate(&params.token, &params.source_id, &params.cam_id) {
            Verdict::Accept { camera } => Ok(Admission::Producer { params, camera }),
            Verdict::Reject { reason } => Err(HandshakeError::Rejected(reason)),
        },
    }
}

// =============================================================================
// PRODUCER
// =============================================================================

/// What the producer loop should do after one inbound message.
#[derive(Debug)]
enum ProducerStep {
    Continue,
    /// Send a non-fatal diagnostic back to the producer.
    Reply(Diagnostic),
    /// Close the producer connection with the given code and reason.
    Close { code: u16, reason: String },
    Disconnect,
}

async fn run_producer(
    mut socket: WebSocket,
    state: AppState,
    session_id: Uuid,
    params: ProducerParams,
    camera: Option<CameraInfo>,
) {
    let Ok(_guard) = state.hub.producer_connected() else {
        reject(socket, &HandshakeError::Closed).await;
        return;
    };

    info!(%session_id, source_id = %params.source_id, cam_id = %params.cam_id, "ws: producer connected");

    let mut ingest = Ingest::new();

    loop {
        let inbound = tokio::select! {
            () = state.hub.closed() => {
                close(&mut socket, close_code::AWAY, SHUTDOWN_REASON).await;
                break;
            }
            inbound = socket.recv() => inbound,
        };
        let Some(msg) = inbound else {
            break;
        };
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                let err = TransportError::from(e);
                warn!(%session_id, code = err.error_code(), error = %err, "ws: producer transport error");
                break;
            }
        };

        match process_producer_message(&state, session_id, &mut ingest, camera.as_ref(), msg).await {
            ProducerStep::Continue => {}
            ProducerStep::Reply(diagnostic) => {
                if let Err(e) = send_json(&mut socket, &diagnostic, state.config.send_timeout).await {
                    warn!(%session_id, error = %e, "ws: failed to send diagnostic");
                    break;
                }
            }
            ProducerStep::Close { code, reason } => {
                close(&mut socket, code, &reason).await;
                break;
            }
            ProducerStep::Disconnect => break,
        }
    }

    if let Some(stale) = ingest.discard() {
        debug!(%session_id, fram_id = %stale.record.fram_id, "ws: discarded pending metadata");
    }
    info!(%session_id, "ws: producer disconnected");
}

/// Feed one inbound producer message through the ingest state machine.
///
/// Kept free of socket writes so tests can drive it directly.
async fn process_producer_message(
    state: &AppState,
    session_id: Uuid,
    ingest: &mut Ingest,
    camera: Option<&CameraInfo>,
    msg: Message,
) -> ProducerStep {
    let result = match msg {
        Message::Text(text) => ingest.accept_text(text.as_str()),
        Message::Binary(image) => match ingest.accept_binary(image) {
            Ok(frame) => {
                relay(state, session_id, frame, camera).await;
                Ok(())
            }
            Err(e) => Err(e),
        },
        Message::Close(_) => return ProducerStep::Disconnect,
        Message::Ping(_) | Message::Pong(_) => return ProducerStep::Continue,
    };

    match result {
        Ok(()) => ProducerStep::Continue,
        Err(e) => on_ingest_error(state, session_id, e),
    }
}

fn on_ingest_error(state: &AppState, session_id: Uuid, err: IngestError) -> ProducerStep {
    if err.is_fatal() {
        warn!(%session_id, code = err.error_code(), error = %err, "ws: closing producer");
        return ProducerStep::Close { code: close_code::PROTOCOL, reason: err.to_string() };
    }

    warn!(%session_id, code = err.error_code(), error = %err, "ws: metadata dropped");
    if state.config.echo_errors {
        ProducerStep::Reply(Diagnostic::from_error(&err))
    } else {
        ProducerStep::Continue
    }
}

async fn relay(state: &AppState, session_id: Uuid, frame: Frame, camera: Option<&CameraInfo>) {
    let fram_id = frame.fram_id().to_owned();
    let cam_id = frame.cam_id().to_owned();
    let bytes = frame.image.len();
    match state.hub.broadcast(frame, camera).await {
        Ok(delivery) => {
            info!(
                %session_id,
                %fram_id,
                %cam_id,
                bytes,
                delivered = delivery.delivered,
                dropped = delivery.dropped,
                "ws: frame relayed"
            );
        }
        Err(e) => warn!(%session_id, %fram_id, error = %e, "ws: failed to encode frame"),
    }
}

// =============================================================================
// CONSUMER
// =============================================================================

async fn run_consumer(mut socket: WebSocket, state: AppState, session_id: Uuid) {
    let Ok(mut queue) = state.hub.register_consumer(session_id).await else {
        reject(socket, &HandshakeError::Closed).await;
        return;
    };

    info!(%session_id, "ws: consumer connected");

    loop {
        tokio::select! {
            outbound = queue.recv() => {
                let Some(text) = outbound else {
                    close(&mut socket, close_code::AWAY, SHUTDOWN_REASON).await;
                    break;
                };
                if let Err(e) = send_with_timeout(&mut socket, Message::Text(text), state.config.send_timeout).await {
                    warn!(%session_id, code = e.error_code(), error = %e, "ws: consumer send failed");
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    None | Some(Ok(Message::Close(_))) => break,
                    Some(Err(e)) => {
                        let err = TransportError::from(e);
                        warn!(%session_id, code = err.error_code(), error = %err, "ws: consumer transport error");
                        break;
                    }
                    Some(Ok(_)) => debug!(%session_id, "ws: ignoring consumer message"),
                }
            }
        }
    }

    state.hub.remove_consumer(session_id).await;
    info!(%session_id, "ws: consumer disconnected");
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_with_timeout(socket: &mut WebSocket, msg: Message, limit: Option<Duration>) -> Result<(), TransportError> {
    let Some(limit) = limit else {
        return socket.send(msg).await.map_err(TransportError::from);
    };
    match tokio::time::timeout(limit, socket.send(msg)).await {
        Ok(result) => result.map_err(TransportError::from),
        Err(_) => Err(TransportError::SendTimeout(limit)),
    }
}

async fn send_json(socket: &mut WebSocket, value: &impl Serialize, limit: Option<Duration>) -> Result<(), TransportError> {
    let json = serde_json::to_string(value)?;
    send_with_timeout(socket, Message::Text(json.into()), limit).await
}

async fn close(socket: &mut WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame { code, reason: truncate_reason(reason).to_owned().into() };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "ws: close frame not delivered");
    }
}

async fn reject(mut socket: WebSocket, err: &HandshakeError) {
    let code = match err {
        HandshakeError::Closed => close_code::AWAY,
        _ => close_code::POLICY,
    };
    close(&mut socket, code, &err.to_string()).await;
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
