// incident-api-rs/src/main.rs
// Incident analysis API server

use std::net::SocketAddr;
use std::sync::Arc;

use analysis_gateway::{AnalysisGateway, GatewayConfig};
use incident_api::{create_router, init_tracing};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = GatewayConfig::from_env()?;
    let bind_addr = config.server.bind_addr.clone();

    let gateway = Arc::new(AnalysisGateway::from_config(config)?);
    let _maintenance = gateway.spawn_maintenance();

    let app = create_router(Arc::clone(&gateway));
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!(
        addr = %bind_addr,
        backend = gateway.backend_identity(),
        "Incident API listening"
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Incident API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
