//! SessionController - start/stop/status of the live detection loop
//!
//! ## Responsibilities
//!
//! - At most one detection loop worker at any time
//! - Cooperative cancellation of the running worker
//! - Running flag readable without waiting on control operations
//! - Flag reset when the worker dies on its own (camera failure)

use crate::detection_loop::{self, Annotation, LoopContext, LoopExit};
use crate::ledger_client::Ledger;
use crate::models::CheckpointId;
use crate::vision::{CameraProvider, SymbolDecoder, TrackerFactory};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Time a cancelled worker may need to read and decode its last frame
pub const FRAME_ALLOWANCE: Duration = Duration::from_secs(1);

/// How long start/shutdown wait for a cancelled worker to release the camera.
/// A worker may be blocked in one submission when cancelled, so the wait
/// covers the full ledger timeout plus one frame.
pub fn stop_grace(ledger_timeout: Duration) -> Duration {
    ledger_timeout + FRAME_ALLOWANCE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopping,
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopStatus {
    pub running: bool,
}

/// Backends shared by every loop run
pub struct LoopEnvironment<L: Ledger> {
    pub camera: Arc<dyn CameraProvider>,
    pub decoder: Arc<dyn SymbolDecoder>,
    pub tracker_factory: Arc<dyn TrackerFactory>,
    pub ledger: Arc<L>,
    pub interval: Duration,
    /// See [`stop_grace`]
    pub stop_grace: Duration,
    pub annotations: Arc<watch::Sender<Option<Annotation>>>,
}

struct Worker {
    id: Uuid,
    checkpoint: CheckpointId,
    cancel: CancellationToken,
    handle: JoinHandle<LoopExit>,
}

/// Owns the single detection loop worker
pub struct SessionController<L: Ledger> {
    env: LoopEnvironment<L>,
    running: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    worker: Mutex<Option<Worker>>,
}

impl<L: Ledger> SessionController<L> {
    pub fn new(env: LoopEnvironment<L>) -> Self {
        Self {
            env,
            running: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
        }
    }

    /// Start a loop for `checkpoint` unless one is running
    pub async fn start(&self, checkpoint: CheckpointId) -> StartOutcome {
        let mut slot = self.worker.lock().await;

        if self.running.load(Ordering::SeqCst) {
            tracing::warn!("Detection loop already running");
            return StartOutcome::AlreadyRunning;
        }

        // A stopped worker may still be releasing the camera
        if let Some(previous) = slot.take() {
            previous.cancel.cancel();
            if let Some(unfinished) = Self::join(previous, self.env.stop_grace).await {
                tracing::warn!(
                    worker_id = %unfinished.id,
                    "Previous detection loop has not released the camera yet"
                );
                *slot = Some(unfinished);
                return StartOutcome::AlreadyRunning;
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let ctx = LoopContext {
            camera: self.env.camera.clone(),
            decoder: self.env.decoder.clone(),
            tracker_factory: self.env.tracker_factory.clone(),
            ledger: self.env.ledger.clone(),
            interval: self.env.interval,
            checkpoint,
            annotations: self.env.annotations.clone(),
        };

        self.running.store(true, Ordering::SeqCst);
        let run = detection_loop::spawn(ctx, cancel.clone());
        let running = self.running.clone();
        let current = self.generation.clone();
        let handle = tokio::spawn(async move {
            let exit = run.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Detection loop worker panicked");
                LoopExit::Stopped
            });
            // A newer worker owns the flag once it has started
            if current.load(Ordering::SeqCst) == generation {
                running.store(false, Ordering::SeqCst);
            }
            exit
        });

        let id = Uuid::new_v4();
        tracing::info!(worker_id = %id, checkpoint_id = %checkpoint, "Detection loop started");
        *slot = Some(Worker {
            id,
            checkpoint,
            cancel,
            handle,
        });

        StartOutcome::Started
    }

    /// Signal the running loop to stop; does not wait for it
    pub async fn stop(&self) -> StopOutcome {
        let slot = self.worker.lock().await;

        if !self.running.swap(false, Ordering::SeqCst) {
            return StopOutcome::NotRunning;
        }

        if let Some(worker) = slot.as_ref() {
            tracing::info!(
                worker_id = %worker.id,
                checkpoint_id = %worker.checkpoint,
                "Stopping detection loop"
            );
            worker.cancel.cancel();
        }

        StopOutcome::Stopping
    }

    pub fn status(&self) -> LoopStatus {
        LoopStatus {
            running: self.running.load(Ordering::SeqCst),
        }
    }

    /// Stop and wait for the worker to release the camera
    pub async fn shutdown(&self) {
        let mut slot = self.worker.lock().await;
        self.running.store(false, Ordering::SeqCst);

        if let Some(worker) = slot.take() {
            worker.cancel.cancel();
            if let Some(unfinished) = Self::join(worker, self.env.stop_grace).await {
                tracing::warn!(worker_id = %unfinished.id, "Detection loop did not stop in time");
                unfinished.handle.abort();
            }
        }
    }

    /// Wait for a cancelled worker; hands it back if it is still running
    async fn join(mut worker: Worker, grace: Duration) -> Option<Worker> {
        match tokio::time::timeout(grace, &mut worker.handle).await {
            Ok(Ok(exit)) => {
                tracing::debug!(worker_id = %worker.id, exit = ?exit, "Detection loop joined");
                None
            }
            Ok(Err(e)) => {
                tracing::error!(worker_id = %worker.id, error = %e, "Detection loop task failed");
                None
            }
            Err(_) => Some(worker),
        }
    }
}
