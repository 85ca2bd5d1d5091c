//! API Routes

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::models::CheckpointId;
use crate::qr_generator::{self, QrRecordForm};
use crate::session_controller::{StartOutcome, StopOutcome};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Live loop control
        .route("/start", get(start_loop))
        .route("/stop", get(stop_loop))
        .route("/status", get(loop_status))
        .route("/annotation", get(latest_annotation))
        // Single-shot
        .route("/gerar_qrcode", post(generate_qr))
        .route("/upload_image_and_decode", post(upload_image_and_decode))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// ========================================
// Live loop control
// ========================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartQuery {
    checkpoint_id: Option<String>,
}

async fn start_loop(
    State(state): State<AppState>,
    Query(query): Query<StartQuery>,
) -> Result<impl IntoResponse> {
    let checkpoint = match query.checkpoint_id.as_deref() {
        Some(raw) => raw.parse::<CheckpointId>()?,
        None => state.config.checkpoint_id,
    };

    Ok(match state.session.start(checkpoint).await {
        StartOutcome::Started => (StatusCode::OK, Json(json!({"status": "started"}))),
        StartOutcome::AlreadyRunning => {
            (StatusCode::BAD_REQUEST, Json(json!({"status": "already_running"})))
        }
    })
}

async fn stop_loop(State(state): State<AppState>) -> impl IntoResponse {
    match state.session.stop().await {
        StopOutcome::Stopping => (StatusCode::OK, Json(json!({"status": "stopping"}))),
        StopOutcome::NotRunning => (StatusCode::BAD_REQUEST, Json(json!({"status": "not_running"}))),
    }
}

async fn loop_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.status())
}

async fn latest_annotation(State(state): State<AppState>) -> impl IntoResponse {
    let annotation = state.annotations.borrow().clone();
    Json(annotation)
}

// ========================================
// QR generation
// ========================================

async fn generate_qr(Form(form): Form<QrRecordForm>) -> Result<impl IntoResponse> {
    let png = tokio::task::spawn_blocking(move || qr_generator::generate(&form))
        .await
        .map_err(|e| Error::Internal(format!("QR render task failed: {}", e)))??;

    Ok(([(header::CONTENT_TYPE, "image/png")], png))
}

// ========================================
// Upload decode
// ========================================

async fn upload_image_and_decode(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let mut image: Option<Vec<u8>> = None;
    let mut checkpoint: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => image = Some(field.bytes().await?.to_vec()),
            Some("idPonto") => checkpoint = Some(field.text().await?),
            other => tracing::debug!(field = ?other, "Ignoring multipart field"),
        }
    }

    // checkpoint first: no image work for a request that cannot be recorded
    super::parse_checkpoint(checkpoint.as_deref())?;
    let image = image.ok_or_else(|| Error::InvalidRequest("file is required".to_string()))?;

    let response = super::decode_uploaded_image(
        state.decoder.clone(),
        state.ledger.clone(),
        image,
        checkpoint.as_deref(),
    )
    .await?;

    Ok(Json(response))
}
