//! Main Entrypoint for the Callboard API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Resolving the calling API credential.
//! 3. Initializing the calling API client, transport factory, and record cache.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use callboard_api::{
    config::{Config, CredentialSource},
    credential,
    router::create_router,
    state::AppState,
};
use callboard_core::{calling_api::HttpCallingApi, record::RecordCache};
use callboard_realtime::WebCallTransportFactory;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal. Shutting down gracefully..."),
        Err(e) => error!(error = %e, "Failed to install Ctrl+C handler"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Resolve Credential ---
    let api_key = credential::resolve(&config.credential)
        .await
        .context("Failed to resolve the calling API credential")?;
    let credential_source = match &config.credential {
        CredentialSource::Env(_) => "env",
        CredentialSource::Broker(_) => "broker",
    };

    // --- 4. Initialize Shared Services ---
    let app_state = Arc::new(AppState {
        calling_api: Arc::new(HttpCallingApi::new(
            config.calling_api_base_url.clone(),
            api_key,
        )),
        transports: Arc::new(WebCallTransportFactory::new(config.realtime_url.clone())),
        records: RecordCache::new(),
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        calling_api = %config.calling_api_base_url,
        realtime = %config.realtime_url,
        credential = credential_source,
        poll_interval = ?config.poll_interval,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
