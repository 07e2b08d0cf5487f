//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the relay hub, the credential hook consulted on every producer
//! handshake, and the runtime configuration.

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::credentials::CredentialValidator;
use crate::hub::Hub;

/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub credentials: Arc<dyn CredentialValidator>,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(config: RelayConfig, credentials: Arc<dyn CredentialValidator>) -> Self {
        Self { hub: Hub::new(config.consumer_queue), credentials, config: Arc::new(config) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
