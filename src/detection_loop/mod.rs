//! DetectionLoop - live camera state machine
//!
//! ## Responsibilities
//!
//! - Throttled QR decoding on the live stream
//! - Tracker hand-off between decodes
//! - Submission of decoded records through the scan pipeline
//! - Per-frame annotation (box + asset/checkpoint/time)
//!
//! Decoding and tracking are independent: a failed decode never resets a
//! live tracker, and a lost tracker never blocks the next decode.

mod runner;

pub use runner::{run_blocking, spawn, LoopContext, LoopExit};

use crate::ledger_client::Ledger;
use crate::models::{CheckpointId, MovementRecord, SubmissionOutcome};
use crate::payload_builder::StructuredPayload;
use crate::pipeline::{self, Cadence, Forwarding, ScanResult};
use crate::vision::{BoundingBox, Frame, SymbolDecoder, Tracker, TrackerFactory};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decode interval of the HTTP service
pub const SERVICE_DECODE_INTERVAL: Duration = Duration::from_secs(2);
/// Decode interval of the standalone reader
pub const STANDALONE_DECODE_INTERVAL: Duration = Duration::from_secs(5);

/// Loop state as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// No camera held
    Idle,
    /// Camera being opened, no frame yet
    Acquiring,
    /// Frames flowing, no tracker lock
    Detecting,
    /// Tracker holds a box
    Tracking,
}

/// Tracking state, owned by one loop instance
#[derive(Debug, Clone)]
pub struct TrackState {
    pub active_bbox: Option<BoundingBox>,
    /// Last payload that produced a record; kept across tracker loss
    pub last_decoded_payload: Option<StructuredPayload>,
    pub last_record: Option<MovementRecord>,
    pub last_submission: Option<SubmissionOutcome>,
    /// Decode throttle, holds the last attempt instant
    pub cadence: Cadence,
}

impl TrackState {
    pub fn new(interval: Duration) -> Self {
        Self {
            active_bbox: None,
            last_decoded_payload: None,
            last_record: None,
            last_submission: None,
            cadence: Cadence::throttled(interval),
        }
    }
}

/// Ledger verdict as shown next to the box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionBadge {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

/// What would be drawn on the frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub phase: LoopPhase,
    pub checkpoint_id: CheckpointId,
    pub bbox: Option<BoundingBox>,
    pub asset_id: Option<String>,
    pub timestamp: Option<String>,
    pub last_submission: Option<SubmissionBadge>,
}

impl Annotation {
    pub fn phase_only(phase: LoopPhase, checkpoint_id: CheckpointId) -> Self {
        Self {
            phase,
            checkpoint_id,
            bbox: None,
            asset_id: None,
            timestamp: None,
            last_submission: None,
        }
    }

    /// Overlay caption
    pub fn label(&self) -> Option<String> {
        self.asset_id.as_ref().map(|id| format!("Moto: {}", id))
    }
}

/// Tracker activity in one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    /// No tracker running
    Inactive,
    Locked(BoundingBox),
    Lost,
}

/// Everything one frame produced
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub scan: ScanResult,
    pub tracker: TrackerEvent,
    pub annotation: Annotation,
}

/// One running detection/tracking instance
pub struct DetectionLoop {
    decoder: Arc<dyn SymbolDecoder>,
    tracker_factory: Arc<dyn TrackerFactory>,
    checkpoint: CheckpointId,
    tracker: Option<Box<dyn Tracker>>,
    state: TrackState,
}

impl DetectionLoop {
    pub fn new(
        decoder: Arc<dyn SymbolDecoder>,
        tracker_factory: Arc<dyn TrackerFactory>,
        checkpoint: CheckpointId,
        interval: Duration,
    ) -> Self {
        Self {
            decoder,
            tracker_factory,
            checkpoint,
            tracker: None,
            state: TrackState::new(interval),
        }
    }

    pub fn state(&self) -> &TrackState {
        &self.state
    }

    pub fn phase(&self) -> LoopPhase {
        if self.tracker.is_some() {
            LoopPhase::Tracking
        } else {
            LoopPhase::Detecting
        }
    }

    /// Run one iteration: cadence-gated decode, then tracker update
    pub async fn process_frame<L: Ledger>(
        &mut self,
        frame: &Frame,
        now: Instant,
        ledger: &L,
    ) -> FrameReport {
        let scan = pipeline::scan(
            self.decoder.as_ref(),
            frame,
            &mut self.state.cadence,
            now,
            self.checkpoint,
            ledger,
        )
        .await;

        if let ScanResult::Detected(detection) = &scan {
            match &detection.forwarding {
                Forwarding::Submitted(outcome) => {
                    self.state.last_decoded_payload = detection.payload.as_structured().cloned();
                    self.state.last_record = Some(outcome.record_sent.clone());
                    self.state.last_submission = Some(outcome.clone());
                }
                Forwarding::Rejected(e) => {
                    tracing::warn!(error = %e, "QR payload rejected, nothing sent");
                }
                Forwarding::NotStructured => {
                    tracing::info!(kind = detection.payload.kind(), "QR does not contain a JSON record");
                }
            }

            // Re-initialised on every decode, even when already locked on the same tag
            self.tracker = Some(self.tracker_factory.create(frame, detection.symbol.bbox));
        }

        let tracker = match self.tracker.as_mut().map(|t| t.update(frame)) {
            None => TrackerEvent::Inactive,
            Some(Some(bbox)) => {
                self.state.active_bbox = Some(bbox);
                TrackerEvent::Locked(bbox)
            }
            Some(None) => {
                tracing::debug!("Tracker lost lock");
                self.tracker = None;
                self.state.active_bbox = None;
                TrackerEvent::Lost
            }
        };

        FrameReport {
            scan,
            tracker,
            annotation: self.annotation(),
        }
    }

    pub fn annotation(&self) -> Annotation {
        let record = self.state.last_record.as_ref();
        Annotation {
            phase: self.phase(),
            checkpoint_id: self.checkpoint,
            bbox: self.state.active_bbox,
            asset_id: record.map(|r| r.asset_id.clone()),
            timestamp: record.map(|r| r.timestamp.clone()),
            last_submission: self.state.last_submission.as_ref().map(|o| SubmissionBadge {
                accepted: o.accepted,
                http_status: o.http_status,
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted tracker for loop tests

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Each created tracker replays the shared script, then keeps its lock
    #[derive(Default)]
    pub struct ScriptedTrackerFactory {
        pub script: Arc<Mutex<VecDeque<bool>>>,
        pub created: AtomicUsize,
    }

    impl ScriptedTrackerFactory {
        pub fn new(script: Vec<bool>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                created: AtomicUsize::new(0),
            }
        }

        pub fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }
    }

    struct ScriptedTracker {
        bbox: BoundingBox,
        script: Arc<Mutex<VecDeque<bool>>>,
    }

    impl Tracker for ScriptedTracker {
        fn update(&mut self, _frame: &Frame) -> Option<BoundingBox> {
            let locked = self.script.lock().unwrap().pop_front().unwrap_or(true);
            locked.then_some(self.bbox)
        }
    }

    impl TrackerFactory for ScriptedTrackerFactory {
        fn create(&self, _frame: &Frame, bbox: BoundingBox) -> Box<dyn Tracker> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Box::new(ScriptedTracker {
                bbox,
                script: self.script.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedTrackerFactory;
    use super::*;
    use crate::pipeline::testing::{RecordingLedger, ScriptedDecoder};
    use crate::vision::Symbol;

    fn symbol(text: &str) -> Symbol {
        Symbol {
            text: text.to_string(),
            bbox: BoundingBox::new(20, 30, 60, 60),
        }
    }

    fn checkpoint() -> CheckpointId {
        CheckpointId::new(2).unwrap()
    }

    fn new_loop(
        decoder: Arc<ScriptedDecoder>,
        trackers: Arc<ScriptedTrackerFactory>,
    ) -> DetectionLoop {
        DetectionLoop::new(decoder, trackers, checkpoint(), SERVICE_DECODE_INTERVAL)
    }

    #[tokio::test]
    async fn test_scenario_decode_submit_then_track() {
        let decoder = Arc::new(ScriptedDecoder::new(vec![vec![symbol(r#"{"idMoto":"MOTO-001"}"#)]]));
        let trackers = Arc::new(ScriptedTrackerFactory::new(vec![]));
        let ledger = RecordingLedger::new(201);
        let mut detection = new_loop(decoder.clone(), trackers.clone());
        let frame = Frame::filled(160, 120, 255);
        let start = Instant::now();

        let report = detection.process_frame(&frame, start, &ledger).await;

        assert!(matches!(report.scan, ScanResult::Detected(_)));
        assert_eq!(report.tracker, TrackerEvent::Locked(BoundingBox::new(20, 30, 60, 60)));
        assert_eq!(detection.phase(), LoopPhase::Tracking);
        assert_eq!(report.annotation.asset_id.as_deref(), Some("MOTO-001"));
        assert_eq!(report.annotation.label().as_deref(), Some("Moto: MOTO-001"));
        assert_eq!(
            report.annotation.last_submission,
            Some(SubmissionBadge { accepted: true, http_status: Some(201) })
        );

        // frames inside the interval only track
        for i in 1..30 {
            let report = detection
                .process_frame(&frame, start + Duration::from_millis(i * 33), &ledger)
                .await;
            assert_eq!(report.scan, ScanResult::NotDue);
            assert!(matches!(report.tracker, TrackerEvent::Locked(_)));
        }

        let sent = ledger.submitted();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].asset_id, "MOTO-001");
        assert_eq!(sent[0].checkpoint_id.get(), 2);
        assert_eq!(sent[0].movement_id, None);
        assert_eq!(decoder.calls(), 1);
        assert_eq!(trackers.created(), 1);
    }

    #[tokio::test]
    async fn test_decode_attempts_bounded_by_interval() {
        let decoder = Arc::new(ScriptedDecoder::new(vec![]));
        let trackers = Arc::new(ScriptedTrackerFactory::new(vec![]));
        let ledger = RecordingLedger::new(201);
        let mut detection = new_loop(decoder.clone(), trackers);
        let frame = Frame::filled(16, 16, 255);
        let start = Instant::now();

        // 3 intervals of frames at 25 fps
        for i in 0..150u64 {
            let report = detection
                .process_frame(&frame, start + Duration::from_millis(i * 40), &ledger)
                .await;
            assert_eq!(report.tracker, TrackerEvent::Inactive);
        }

        assert_eq!(decoder.calls(), 3);
        assert_eq!(detection.phase(), LoopPhase::Detecting);
    }

    #[tokio::test]
    async fn test_tracker_loss_keeps_payload() {
        let decoder = Arc::new(ScriptedDecoder::new(vec![vec![symbol(r#"{"idMoto":"MOTO-001"}"#)]]));
        // lock on the decode frame, lost on the next one
        let trackers = Arc::new(ScriptedTrackerFactory::new(vec![true, false]));
        let ledger = RecordingLedger::new(201);
        let mut detection = new_loop(decoder, trackers);
        let frame = Frame::filled(160, 120, 255);
        let start = Instant::now();

        detection.process_frame(&frame, start, &ledger).await;
        let report = detection
            .process_frame(&frame, start + Duration::from_millis(40), &ledger)
            .await;

        assert_eq!(report.tracker, TrackerEvent::Lost);
        assert_eq!(detection.phase(), LoopPhase::Detecting);
        assert!(detection.state().active_bbox.is_none());
        let payload = detection.state().last_decoded_payload.as_ref().unwrap();
        assert_eq!(payload["idMoto"], "MOTO-001");
        assert_eq!(report.annotation.asset_id.as_deref(), Some("MOTO-001"));
        assert!(report.annotation.bbox.is_none());
    }

    #[tokio::test]
    async fn test_empty_decode_preserves_live_tracker() {
        let decoder = Arc::new(ScriptedDecoder::new(vec![
            vec![symbol(r#"{"idMoto":"MOTO-001"}"#)],
            vec![],
        ]));
        let trackers = Arc::new(ScriptedTrackerFactory::new(vec![]));
        let ledger = RecordingLedger::new(201);
        let mut detection = new_loop(decoder.clone(), trackers.clone());
        let frame = Frame::filled(160, 120, 255);
        let start = Instant::now();

        detection.process_frame(&frame, start, &ledger).await;
        let report = detection
            .process_frame(&frame, start + SERVICE_DECODE_INTERVAL, &ledger)
            .await;

        assert_eq!(report.scan, ScanResult::NoSymbol);
        assert!(matches!(report.tracker, TrackerEvent::Locked(_)));
        assert_eq!(trackers.created(), 1);
        assert_eq!(decoder.calls(), 2);
    }

    #[tokio::test]
    async fn test_text_payload_tracks_without_submitting() {
        let decoder = Arc::new(ScriptedDecoder::new(vec![vec![symbol("not json")]]));
        let trackers = Arc::new(ScriptedTrackerFactory::new(vec![]));
        let ledger = RecordingLedger::new(201);
        let mut detection = new_loop(decoder, trackers.clone());
        let frame = Frame::filled(160, 120, 255);

        let report = detection.process_frame(&frame, Instant::now(), &ledger).await;

        assert!(matches!(report.tracker, TrackerEvent::Locked(_)));
        assert_eq!(trackers.created(), 1);
        assert!(ledger.submitted().is_empty());
        assert!(detection.state().last_decoded_payload.is_none());
        assert!(report.annotation.asset_id.is_none());
    }

    #[tokio::test]
    async fn test_each_decode_reinitialises_tracker() {
        let decoder = Arc::new(ScriptedDecoder::new(vec![
            vec![symbol(r#"{"idMoto":"MOTO-001"}"#)],
            vec![symbol(r#"{"idMoto":"MOTO-001"}"#)],
        ]));
        let trackers = Arc::new(ScriptedTrackerFactory::new(vec![]));
        let ledger = RecordingLedger::new(500);
        let mut detection = new_loop(decoder, trackers.clone());
        let frame = Frame::filled(160, 120, 255);
        let start = Instant::now();

        detection.process_frame(&frame, start, &ledger).await;
        let report = detection
            .process_frame(&frame, start + SERVICE_DECODE_INTERVAL, &ledger)
            .await;

        assert_eq!(trackers.created(), 2);
        assert_eq!(ledger.submitted().len(), 2);
        assert_eq!(
            report.annotation.last_submission,
            Some(SubmissionBadge { accepted: false, http_status: Some(500) })
        );
    }
}
