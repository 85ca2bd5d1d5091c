//! Scan pipeline - decode → classify → build → submit
//!
//! Shared by the live camera loop (throttled cadence) and the upload
//! handler (decode every time). Both call [`scan`] the same way; only the
//! [`Cadence`] they pass differs.

use crate::ledger_client::Ledger;
use crate::models::{CheckpointId, SubmissionOutcome};
use crate::payload_builder::{self, QrPayload, ValidationError};
use crate::vision::{Frame, Symbol, SymbolDecoder};
use std::time::{Duration, Instant};

/// How often a decode may run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadencePolicy {
    /// Every call decodes (single-shot uploads)
    Always,
    /// At most one decode per interval (live camera)
    Throttled(Duration),
}

/// Decode throttle; remembers when the last attempt started
#[derive(Debug, Clone)]
pub struct Cadence {
    policy: CadencePolicy,
    last_attempt: Option<Instant>,
}

impl Cadence {
    pub fn always() -> Self {
        Self {
            policy: CadencePolicy::Always,
            last_attempt: None,
        }
    }

    pub fn throttled(interval: Duration) -> Self {
        Self {
            policy: CadencePolicy::Throttled(interval),
            last_attempt: None,
        }
    }

    pub fn policy(&self) -> CadencePolicy {
        self.policy
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match (self.policy, self.last_attempt) {
            (CadencePolicy::Always, _) | (_, None) => true,
            (CadencePolicy::Throttled(interval), Some(last)) => {
                now.saturating_duration_since(last) >= interval
            }
        }
    }

    /// Start an attempt if one is due. The attempt is recorded whatever its
    /// outcome turns out to be.
    pub fn begin_attempt(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.last_attempt = Some(now);
        true
    }
}

/// What happened to a detected payload
#[derive(Debug, Clone, PartialEq)]
pub enum Forwarding {
    /// Text or broken JSON; never sent
    NotStructured,
    /// Structured, but the record could not be built
    Rejected(ValidationError),
    /// Sent once; the ledger's answer
    Submitted(SubmissionOutcome),
}

/// First symbol of a decode attempt and its fate
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub symbol: Symbol,
    pub payload: QrPayload,
    pub forwarding: Forwarding,
}

/// Result of one pipeline call
#[derive(Debug, Clone, PartialEq)]
pub enum ScanResult {
    /// Cadence not elapsed, nothing decoded
    NotDue,
    /// Decoded, no symbol in the frame
    NoSymbol,
    Detected(Detection),
}

impl ScanResult {
    pub fn attempted(&self) -> bool {
        !matches!(self, ScanResult::NotDue)
    }
}

/// Run one pipeline pass over `frame`
pub async fn scan<L: Ledger>(
    decoder: &dyn SymbolDecoder,
    frame: &Frame,
    cadence: &mut Cadence,
    now: Instant,
    checkpoint: CheckpointId,
    ledger: &L,
) -> ScanResult {
    if !cadence.begin_attempt(now) {
        return ScanResult::NotDue;
    }

    // First symbol in decoder order wins
    let Some(symbol) = decoder.decode(frame).into_iter().next() else {
        tracing::trace!("No QR symbol in frame");
        return ScanResult::NoSymbol;
    };

    ScanResult::Detected(forward(symbol, checkpoint, ledger).await)
}

/// Classify a decoded symbol and submit it when it carries a valid record
pub async fn forward<L: Ledger>(symbol: Symbol, checkpoint: CheckpointId, ledger: &L) -> Detection {
    let payload = QrPayload::parse(&symbol.text);
    tracing::info!(
        kind = payload.kind(),
        text = %symbol.text,
        checkpoint_id = %checkpoint,
        "QR detected"
    );

    let forwarding = match payload.as_structured() {
        None => Forwarding::NotStructured,
        Some(map) => match payload_builder::build(map, checkpoint) {
            Ok(record) => Forwarding::Submitted(ledger.submit(record).await),
            Err(e) => Forwarding::Rejected(e),
        },
    };

    Detection {
        symbol,
        payload,
        forwarding,
    }
}
