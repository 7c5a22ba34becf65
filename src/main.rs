use anyhow::{Context, Result};
use gatewatch::api::{create_bridge_router, BridgeState};
use gatewatch::backend::BackendClient;
use gatewatch::channel::{ChannelConnector, GatewayConnector, MemoryChannel};
use gatewatch::config::resolve_config;
use gatewatch::dispatch::OutboundDispatcher;
use gatewatch::relay::InboundRelay;
use gatewatch::session::SessionManager;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatewatch=info".into()),
        )
        .init();

    info!("Gatewatch bridge starting...");

    let config = resolve_config()?;
    info!(
        listen_addr = %config.bridge.listen_addr,
        gateway_url = %config.session.gateway_url,
        backend_url = %config.backend.base_url,
        auto_reinitialize = config.session.auto_reinitialize,
        dry_run = config.session.dry_run,
        "Configuration loaded"
    );

    // Inbound replies go to the decision backend
    let backend = BackendClient::new(config.backend.clone());
    let relay = Arc::new(InboundRelay::new(backend, config.relay.forward_timeout()));

    let connector: Arc<dyn ChannelConnector> = if config.session.dry_run {
        warn!("Dry run: notifications are logged, not sent");
        Arc::new(MemoryChannel::dry_run())
    } else {
        Arc::new(GatewayConnector::new(
            config.session.gateway_url.clone(),
            config.session.request_timeout(),
        ))
    };
    let session = SessionManager::new(config.session.clone(), connector, relay);

    // Initialization failure is not fatal; the session stays UNINITIALIZED
    // and /health reports it
    if let Err(e) = session.initialize().await {
        warn!(error = %e, "Messaging session did not start");
    }

    let dispatcher = Arc::new(OutboundDispatcher::new(
        Arc::clone(&session),
        config.session.send_timeout(),
    ));
    let router = create_bridge_router(
        BridgeState {
            session: Arc::clone(&session),
            dispatcher,
        },
        &config.bridge.allowed_origins,
    );

    let listener = tokio::net::TcpListener::bind(&config.bridge.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bridge.listen_addr))?;
    info!(addr = %config.bridge.listen_addr, "Bridge API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Bridge API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    session.shutdown().await;
    info!("Gatewatch bridge stopped");

    Ok(())
}
