//! Application state
//!
//! Holds all shared components and state

use crate::detection_loop::{Annotation, SERVICE_DECODE_INTERVAL};
use crate::error::Result;
use crate::ledger_client::{LedgerClient, DEFAULT_TIMEOUT_SECS};
use crate::models::CheckpointId;
use crate::session_controller::{self, LoopEnvironment, SessionController};
use crate::vision::{
    CameraProvider, FfmpegCameraConfig, FfmpegCameraProvider, RqrrDecoder, SymbolDecoder,
    TemplateTrackerFactory, TrackerFactory,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Movement ledger endpoint
    pub ledger_url: String,
    /// Bounded wait for one ledger submission
    pub ledger_timeout: Duration,
    /// Minimum time between live decode attempts
    pub decode_interval: Duration,
    /// Checkpoint used by /start when none is given
    pub checkpoint_id: CheckpointId,
    /// Camera device or stream
    pub camera: FfmpegCameraConfig,
    /// Allowed browser origin
    pub cors_origin: String,
    /// Multipart body limit
    pub max_upload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let camera_defaults = FfmpegCameraConfig::default();
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 8000),
            ledger_url: std::env::var("LEDGER_URL")
                .unwrap_or_else(|_| "http://localhost:8080/api/movimentacoes".to_string()),
            ledger_timeout: Duration::from_secs(env_or("LEDGER_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)),
            decode_interval: env_seconds("DECODE_INTERVAL_SECS", SERVICE_DECODE_INTERVAL),
            checkpoint_id: env_or("CHECKPOINT_ID", CheckpointId::DEFAULT),
            camera: FfmpegCameraConfig {
                input: std::env::var("CAMERA_INPUT").unwrap_or(camera_defaults.input),
                format: match std::env::var("CAMERA_FORMAT") {
                    Ok(f) if f.is_empty() => None,
                    Ok(f) => Some(f),
                    Err(_) => camera_defaults.format,
                },
                width: env_or("CAMERA_WIDTH", camera_defaults.width),
                height: env_or("CAMERA_HEIGHT", camera_defaults.height),
            },
            cors_origin: std::env::var("CORS_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 10 * 1024 * 1024),
        }
    }
}

/// Parse an env var, keeping `default` when it is unset or unreadable
fn env_or<T: FromStr + std::fmt::Debug>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = ?default, "Invalid config value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_seconds(key: &str, default: Duration) -> Duration {
    let secs: f64 = env_or(key, default.as_secs_f64());
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
        .unwrap_or_else(|| {
            tracing::warn!(key, secs, "Decode interval must be positive, using default");
            default
        })
}

/// Vision backends the service runs with
pub struct Backends {
    pub camera: Arc<dyn CameraProvider>,
    pub decoder: Arc<dyn SymbolDecoder>,
    pub tracker_factory: Arc<dyn TrackerFactory>,
}

impl Backends {
    /// ffmpeg camera, rqrr decoder, template tracker
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            camera: Arc::new(FfmpegCameraProvider::new(config.camera.clone())),
            decoder: Arc::new(RqrrDecoder::new()),
            tracker_factory: Arc::new(TemplateTrackerFactory::default()),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub ledger: Arc<LedgerClient>,
    pub decoder: Arc<dyn SymbolDecoder>,
    pub session: Arc<SessionController<LedgerClient>>,
    pub annotations: watch::Receiver<Option<Annotation>>,
}

impl AppState {
    pub fn new(config: AppConfig, backends: Backends) -> Result<Self> {
        let ledger = Arc::new(LedgerClient::with_timeout(
            config.ledger_url.clone(),
            config.ledger_timeout,
        )?);
        let (annotation_tx, annotations) = watch::channel(None);

        let session = Arc::new(SessionController::new(LoopEnvironment {
            camera: backends.camera,
            decoder: backends.decoder.clone(),
            tracker_factory: backends.tracker_factory,
            ledger: ledger.clone(),
            interval: config.decode_interval,
            stop_grace: session_controller::stop_grace(config.ledger_timeout),
            annotations: Arc::new(annotation_tx),
        }));

        Ok(Self {
            config,
            ledger,
            decoder: backends.decoder,
            session,
            annotations,
        })
    }
}
