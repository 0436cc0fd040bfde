use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_engine::{EngineConfig, Orchestrator};
use strelay_server::resolver::HttpResolver;
use strelay_server::routes::build_router;
use strelay_server::{AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strelay_server=info,relay_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let server_config = ServerConfig::from_env_or_default();
    let engine_config = EngineConfig::from_env_or_default();

    let resolver = Arc::new(HttpResolver::new(server_config.resolver_url.clone())?);
    let orchestrator = Arc::new(Orchestrator::new(resolver, engine_config)?);
    let state = AppState::new(orchestrator);

    let app = build_router(state, server_config.enable_cors);

    let addr = format!("{}:{}", server_config.bind_address, server_config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, resolver = %server_config.resolver_url, "strelay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install ctrl-c handler: {e}");
        return;
    }
    tracing::info!("shutdown signal received");
}
