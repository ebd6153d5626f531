//! camrelay - Single-Viewer Camera Relay
//!
//! Main entry point for the relay server.

use camrelay::state::{AppConfig, AppState};
use camrelay::web_api;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camrelay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting camrelay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        host = %config.host,
        port = config.port,
        camera_url_configured = config.camera_url.is_some(),
        frame_interval_sec = config.frame_interval_sec,
        open_retry_sec = config.open_retry_sec,
        lock_wait_sec = config.lock_wait_sec,
        probe_timeout_sec = config.probe_timeout_sec,
        ack_timeout_sec = config.ack_timeout_sec,
        "Configuration loaded"
    );

    let state = AppState::new(config);
    tracing::info!("StreamCoordinator initialized");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = web_api::create_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
