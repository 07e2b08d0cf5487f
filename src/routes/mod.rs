//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! A single Axum router: the relay websocket at `/ws` (producers and
//! consumers share the endpoint and are told apart by `role`), a liveness
//! probe, and a JSON stats view of the hub.

pub mod ws;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::hub::HubStats;
use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::handle_ws))
        .route("/api/stats", get(stats))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats().await)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
