use dotenvy::dotenv;
use service_core::observability::init_tracing;
use tracing::info;
use verification_gateway::config::get_configuration;
use verification_gateway::startup::build_router;
use verification_gateway::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let configuration = get_configuration().map_err(|e| {
        eprintln!("Failed to read configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    init_tracing(
        "verification-gateway",
        &configuration.observability.log_level,
        configuration.observability.otlp_endpoint.as_deref(),
    )?;

    verification_gateway::services::metrics::init_metrics();

    let address = format!(
        "{}:{}",
        configuration.server.host, configuration.server.port
    );

    let state = AppState::from_settings(configuration)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&address).await.map_err(|e| {
        tracing::error!("Failed to bind TCP listener to {}: {}", address, e);
        anyhow::anyhow!("Failed to bind to address {}: {}", address, e)
    })?;

    info!("Starting verification-gateway on {}", address);
    axum::serve(listener, app).await.map_err(|e| {
        tracing::error!("Server error: {}", e);
        anyhow::anyhow!("Server error: {}", e)
    })?;

    Ok(())
}
