mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use arbiter_common::config::ServiceConfig;
use arbiter_engine::LanguageRegistry;
use axum::Router;
use redis::aio::ConnectionManager;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub redis: ConnectionManager,
    pub registry: Arc<LanguageRegistry>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Arbiter API booting...");

    let config = ServiceConfig::from_env();

    // Same source of truth as the worker, so submissions for disabled languages fail fast
    let registry = match std::env::var("ARBITER_LANGUAGES_FILE") {
        Ok(path) if !path.trim().is_empty() => LanguageRegistry::load(Path::new(&path))
            .with_context(|| format!("Failed to load language profiles from {}", path))?,
        _ => LanguageRegistry::builtin(),
    };
    info!("Enabled languages: {:?}", registry.list_languages());

    metrics::init_metrics();

    // Connect to Redis
    let client = redis::Client::open(config.redis_url.as_str()).context("Invalid REDIS_URL")?;
    let redis_conn = ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;

    info!("Connected to Redis: {}", config.redis_url);

    let state = Arc::new(AppState {
        redis: redis_conn,
        registry: Arc::new(registry),
    });

    // Build router
    let app = Router::new().merge(routes::routes()).with_state(state);

    // Start server
    let listener = TcpListener::bind(&config.api_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api_addr))?;

    info!("HTTP server listening on {}", config.api_addr);
    info!("Ready to accept jobs");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
