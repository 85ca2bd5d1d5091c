//! Checkpoint Tracker - HTTP service
//!
//! Main entry point: REST API plus the camera loop it controls.

use anyhow::Context;
use axum::http::HeaderValue;
use checkpoint_tracker::{
    state::{AppConfig, AppState, Backends},
    web_api,
};
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
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
                .unwrap_or_else(|_| "checkpoint_tracker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Checkpoint Tracker v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        ledger_url = %config.ledger_url,
        ledger_timeout_secs = config.ledger_timeout.as_secs(),
        decode_interval_ms = config.decode_interval.as_millis() as u64,
        checkpoint_id = %config.checkpoint_id,
        camera = %config.camera.input,
        "Configuration loaded"
    );

    let cors_origin = HeaderValue::from_str(&config.cors_origin)
        .with_context(|| format!("invalid CORS_ORIGIN {:?}", config.cors_origin))?;

    let backends = Backends::from_config(&config);
    let state = AppState::new(config, backends)?;
    let session = state.session.clone();
    let addr = format!("{}:{}", state.config.host, state.config.port);

    let app = web_api::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(cors_origin)
                .allow_methods(AllowMethods::mirror_request())
                .allow_headers(AllowHeaders::mirror_request())
                .allow_credentials(true),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // Release the camera before exiting
    session.shutdown().await;
    tracing::info!("Checkpoint Tracker stopped");

    Ok(())
}
