//! Hybrid chat server
//!
//! Local-first conversational backend with remote fallback and media tools.

use hybrid_chat::api::{create_router, AppState};
use hybrid_chat::config::Config;
use hybrid_chat::session::Orchestrator;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hybrid_chat=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env()?;

    if config.has_remote() {
        tracing::info!(model = %config.remote.model, "Remote engine configured");
    } else {
        tracing::warn!("No remote engine configured. Set REMOTE_API_KEY or GATEWAY_URL.");
    }
    match &config.local {
        Some(local) => tracing::info!(model = %local.model, url = %local.base_url, "Local engine configured"),
        None => tracing::info!("No local engine configured. Set LOCAL_MODEL to enable one."),
    }
    if config.media.fal_key.is_none() {
        tracing::warn!("FAL_KEY not set; media tool calls will fail");
    }

    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);

    // Probe in the background so the first turn does not pay for model load
    let warm = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        let state = warm.ensure_probed().await;
        tracing::info!(state = state.as_str(), "Startup probe finished");
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(orchestrator))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Hybrid chat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
