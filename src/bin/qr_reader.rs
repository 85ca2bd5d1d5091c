//! Standalone QR reader
//!
//! Runs the detection loop against a local camera without the HTTP API.
//! Type `q` and Enter to quit.
//!
//! ```bash
//! qr-reader --checkpoint 3 --camera /dev/video0
//! ```

use anyhow::Context;
use checkpoint_tracker::{
    detection_loop::{self, Annotation, LoopContext, LoopExit, STANDALONE_DECODE_INTERVAL},
    ledger_client::LedgerClient,
    models::CheckpointId,
    vision::{FfmpegCameraConfig, FfmpegCameraProvider, RqrrDecoder, TemplateTrackerFactory},
};
use clap::Parser;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "qr-reader")]
#[command(about = "Read vehicle QR tags from a camera and record movements")]
struct Args {
    /// Checkpoint id recorded with every movement
    #[arg(long, default_value_t = 1)]
    checkpoint: i64,

    /// Seconds between decode attempts
    #[arg(long, default_value_t = STANDALONE_DECODE_INTERVAL.as_secs_f64())]
    interval: f64,

    /// Movement ledger endpoint
    #[arg(long, env = "LEDGER_URL", default_value = "http://localhost:8080/api/movimentacoes")]
    ledger_url: String,

    /// Seconds to wait for the ledger
    #[arg(long, default_value_t = 5)]
    ledger_timeout: u64,

    /// Camera device or stream URL
    #[arg(long, env = "CAMERA_INPUT", default_value = "/dev/video0")]
    camera: String,

    /// ffmpeg input format; empty lets ffmpeg probe
    #[arg(long, env = "CAMERA_FORMAT", default_value = "v4l2")]
    format: String,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "checkpoint_tracker=info,qr_reader=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let checkpoint = CheckpointId::new(args.checkpoint)?;
    let interval = Duration::try_from_secs_f64(args.interval)
        .ok()
        .filter(|d| !d.is_zero())
        .context("--interval must be a positive number of seconds")?;
    let ledger = LedgerClient::with_timeout(args.ledger_url, Duration::from_secs(args.ledger_timeout))?;

    let camera = FfmpegCameraConfig {
        input: args.camera,
        format: Some(args.format).filter(|f| !f.is_empty()),
        width: args.width,
        height: args.height,
    };

    let (annotation_tx, annotations) = watch::channel(None);
    let ctx = LoopContext {
        camera: Arc::new(FfmpegCameraProvider::new(camera)),
        decoder: Arc::new(RqrrDecoder::new()),
        tracker_factory: Arc::new(TemplateTrackerFactory::default()),
        ledger: Arc::new(ledger),
        interval,
        checkpoint,
        annotations: Arc::new(annotation_tx),
    };

    let cancel = CancellationToken::new();
    watch_stdin(cancel.clone());
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });
    tokio::spawn(log_annotations(annotations));

    tracing::info!(checkpoint_id = %checkpoint, "QR reader started, type 'q' + Enter to quit");

    match detection_loop::spawn(ctx, cancel).await? {
        LoopExit::Stopped => Ok(()),
        LoopExit::DeviceFailure(e) => Err(e).context("camera failure"),
    }
}

/// Cancel on a `q` line; end of input leaves the loop running
fn watch_stdin(cancel: CancellationToken) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                    tracing::info!("Quit requested");
                    cancel.cancel();
                    return;
                }
                Ok(_) => continue,
                Err(_) => return,
            }
        }
    });
}

/// Log whenever what would be drawn on screen changes
async fn log_annotations(mut rx: watch::Receiver<Option<Annotation>>) {
    let mut shown: Option<Annotation> = None;

    while rx.changed().await.is_ok() {
        let Some(current) = rx.borrow_and_update().clone() else {
            continue;
        };

        let changed = shown.as_ref().map_or(true, |prev| {
            prev.phase != current.phase
                || prev.asset_id != current.asset_id
                || prev.last_submission != current.last_submission
        });
        if changed {
            tracing::info!(
                phase = ?current.phase,
                label = current.label().as_deref().unwrap_or("-"),
                bbox = ?current.bbox,
                checkpoint_id = %current.checkpoint_id,
                timestamp = current.timestamp.as_deref().unwrap_or("-"),
                submission = ?current.last_submission,
                "Annotation"
            );
        }
        shown = Some(current);
    }
}
