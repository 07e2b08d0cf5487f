mod config;
mod credentials;
mod frame;
mod handshake;
mod hub;
mod ingest;
mod routes;
mod state;

use std::sync::Arc;

use credentials::{AllowAll, CredentialValidator, StaticCredentials};
use frame::ErrorCode;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = match config::RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => fatal("invalid relay configuration", &e),
    };

    let credentials: Arc<dyn CredentialValidator> = match &config.credentials_file {
        Some(path) => {
            let store = match StaticCredentials::load(path) {
                Ok(store) => store,
                Err(e) => fatal("failed to load credentials file", &e),
            };
            if store.is_empty() {
                tracing::warn!(path = %path.display(), "credential store is empty; every producer will be rejected");
            }
            tracing::info!(path = %path.display(), tokens = store.len(), "credential store loaded");
            Arc::new(store)
        }
        None => {
            tracing::warn!("RELAY_CREDENTIALS_FILE not set; accepting every producer");
            Arc::new(AllowAll)
        }
    };

    let addr = config.listen_addr();
    let state = state::AppState::new(config, credentials);
    let hub = state.hub.clone();

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");

    tracing::info!(%addr, "frame relay listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await
        .expect("server failed");
}

fn fatal(context: &str, err: &impl ErrorCode) -> ! {
    tracing::error!(code = err.error_code(), error = %err, "{context}");
    std::process::exit(1);
}

/// Resolve on Ctrl-C, then close the hub so consumers are told to go away.
async fn shutdown_signal(hub: hub::Hub) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
    hub.close().await;
}
