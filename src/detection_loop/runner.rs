//! Blocking worker that drives a [`DetectionLoop`] from a live camera
//!
//! Frame reads and decoding are CPU/IO blocking, so the loop lives on a
//! `spawn_blocking` thread and only re-enters the runtime for ledger calls.

use super::{Annotation, DetectionLoop, LoopPhase};
use crate::ledger_client::Ledger;
use crate::models::CheckpointId;
use crate::vision::{CameraProvider, DeviceError, SymbolDecoder, TrackerFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything one loop run needs
pub struct LoopContext<L: Ledger> {
    pub camera: Arc<dyn CameraProvider>,
    pub decoder: Arc<dyn SymbolDecoder>,
    pub tracker_factory: Arc<dyn TrackerFactory>,
    pub ledger: Arc<L>,
    pub interval: Duration,
    pub checkpoint: CheckpointId,
    pub annotations: Arc<watch::Sender<Option<Annotation>>>,
}

/// Why a loop run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// Cancelled by the owner
    Stopped,
    /// Camera could not be opened or stopped delivering frames
    DeviceFailure(DeviceError),
}

/// Run until `cancel` fires or the camera fails. The camera is released
/// before this returns.
pub fn run_blocking<L: Ledger>(
    ctx: LoopContext<L>,
    cancel: CancellationToken,
    runtime: Handle,
) -> LoopExit {
    let checkpoint = ctx.checkpoint;
    ctx.annotations
        .send_replace(Some(Annotation::phase_only(LoopPhase::Acquiring, checkpoint)));

    let exit = drive(&ctx, &cancel, &runtime);

    match &exit {
        LoopExit::Stopped => tracing::info!(checkpoint_id = %checkpoint, "Detection loop stopped"),
        LoopExit::DeviceFailure(e) => {
            tracing::error!(checkpoint_id = %checkpoint, error = %e, "Detection loop ended on device failure")
        }
    }
    ctx.annotations
        .send_replace(Some(Annotation::phase_only(LoopPhase::Idle, checkpoint)));
    exit
}

fn drive<L: Ledger>(ctx: &LoopContext<L>, cancel: &CancellationToken, runtime: &Handle) -> LoopExit {
    let mut camera = match ctx.camera.open() {
        Ok(camera) => camera,
        Err(e) => return LoopExit::DeviceFailure(e),
    };

    tracing::info!(
        checkpoint_id = %ctx.checkpoint,
        interval_ms = ctx.interval.as_millis() as u64,
        "Detection loop running"
    );

    let mut detection = DetectionLoop::new(
        ctx.decoder.clone(),
        ctx.tracker_factory.clone(),
        ctx.checkpoint,
        ctx.interval,
    );

    // `camera` drops at the end of this scope on every path
    loop {
        if cancel.is_cancelled() {
            return LoopExit::Stopped;
        }

        let frame = match camera.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                if cancel.is_cancelled() {
                    return LoopExit::Stopped;
                }
                return LoopExit::DeviceFailure(e);
            }
        };

        let report = runtime.block_on(detection.process_frame(&frame, Instant::now(), ctx.ledger.as_ref()));
        ctx.annotations.send_replace(Some(report.annotation));
    }
}

/// Start a run on the blocking pool
pub fn spawn<L: Ledger>(ctx: LoopContext<L>, cancel: CancellationToken) -> JoinHandle<LoopExit> {
    let runtime = Handle::current();
    tokio::task::spawn_blocking(move || run_blocking(ctx, cancel, runtime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection_loop::testing::ScriptedTrackerFactory;
    use crate::pipeline::testing::{RecordingLedger, ScriptedDecoder};
    use crate::vision::{BoundingBox, Frame, FrameSource, Symbol};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Yields `frames` blank frames, then fails
    struct FiniteCamera {
        frames: usize,
        released: Arc<AtomicUsize>,
    }

    struct FiniteSource {
        left: usize,
        released: Arc<AtomicUsize>,
    }

    impl FrameSource for FiniteSource {
        fn read_frame(&mut self) -> Result<Frame, DeviceError> {
            if self.left == 0 {
                return Err(DeviceError::Read("end of stream".to_string()));
            }
            self.left -= 1;
            Ok(Frame::filled(32, 32, 255))
        }
    }

    impl Drop for FiniteSource {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CameraProvider for FiniteCamera {
        fn open(&self) -> Result<Box<dyn FrameSource>, DeviceError> {
            Ok(Box::new(FiniteSource {
                left: self.frames,
                released: self.released.clone(),
            }))
        }
    }

    struct NoCamera;

    impl CameraProvider for NoCamera {
        fn open(&self) -> Result<Box<dyn FrameSource>, DeviceError> {
            Err(DeviceError::Open("/dev/video9: no such device".to_string()))
        }
    }

    fn context(
        camera: Arc<dyn CameraProvider>,
        decoder: Arc<ScriptedDecoder>,
        ledger: Arc<RecordingLedger>,
    ) -> (LoopContext<RecordingLedger>, watch::Receiver<Option<Annotation>>) {
        let (tx, rx) = watch::channel(None);
        let ctx = LoopContext {
            camera,
            decoder,
            tracker_factory: Arc::new(ScriptedTrackerFactory::new(vec![])),
            ledger,
            interval: Duration::from_secs(2),
            checkpoint: CheckpointId::new(4).unwrap(),
            annotations: Arc::new(tx),
        };
        (ctx, rx)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_camera_failure_ends_run_and_releases_camera() {
        let released = Arc::new(AtomicUsize::new(0));
        let decoder = Arc::new(ScriptedDecoder::new(vec![vec![Symbol {
            text: r#"{"idMoto":"MOTO-001"}"#.to_string(),
            bbox: BoundingBox::new(2, 2, 10, 10),
        }]]));
        let ledger = Arc::new(RecordingLedger::new(201));
        let camera = Arc::new(FiniteCamera { frames: 10, released: released.clone() });
        let (ctx, rx) = context(camera, decoder.clone(), ledger.clone());

        let exit = spawn(ctx, CancellationToken::new()).await.unwrap();

        assert!(matches!(exit, LoopExit::DeviceFailure(DeviceError::Read(_))));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        // 10 frames well inside one interval
        assert_eq!(decoder.calls(), 1);
        assert_eq!(ledger.submitted().len(), 1);
        assert_eq!(rx.borrow().as_ref().map(|a| a.phase), Some(LoopPhase::Idle));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_failure_is_reported() {
        let ledger = Arc::new(RecordingLedger::new(201));
        let (ctx, _rx) = context(Arc::new(NoCamera), Arc::new(ScriptedDecoder::new(vec![])), ledger);

        let exit = spawn(ctx, CancellationToken::new()).await.unwrap();

        assert!(matches!(exit, LoopExit::DeviceFailure(DeviceError::Open(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancelled_before_first_frame() {
        let released = Arc::new(AtomicUsize::new(0));
        let camera = Arc::new(FiniteCamera { frames: usize::MAX, released: released.clone() });
        let ledger = Arc::new(RecordingLedger::new(201));
        let decoder = Arc::new(ScriptedDecoder::new(vec![]));
        let (ctx, _rx) = context(camera, decoder.clone(), ledger);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let exit = spawn(ctx, cancel).await.unwrap();

        assert_eq!(exit, LoopExit::Stopped);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(decoder.calls(), 0);
    }
}
