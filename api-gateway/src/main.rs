// ==============================================================================
// main.rs - Contact Import API Gateway Entry Point
// ==============================================================================
// Description: Axum web server accepting contact imports and handing them to
//              the background worker
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, Method},
    routing::{get, post},
    Router,
};
use contact_import::config::ServerConfig;
use contact_import::logging::init_tracing;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

mod content_type;
mod handlers;
mod models;
mod normalizer;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    init_tracing("info,tower_http=info");

    info!("Starting Contact Import API Gateway v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ServerConfig::from_env().context("Invalid server configuration")?;

    // Initialize application state
    let state = AppState::from_env(&config)
        .await
        .context("Failed to initialize application state")?;

    // Build router
    let app = build_router(state, &config.cors_origins, config.max_upload_bytes);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("API Gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("API Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

pub(crate) fn build_router(state: AppState, cors_origins: &[String], body_limit: usize) -> Router {
    // API routes
    let api_routes = Router::new()
        .route("/import", post(handlers::submit_import))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check));

    // CORS configuration (explicit origins only)
    let allowed_origins: Vec<_> = cors_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_credentials(false)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(normalizer::SOURCE_HEADER),
            HeaderName::from_static(normalizer::USE_RESUMABLE_HEADER),
        ])
        .expose_headers([header::CONTENT_TYPE]);

    // Combine routes with middleware
    Router::new()
        .route("/", get(handlers::root))
        .nest("/api/contacts", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}
