//! Single-shot decode of an uploaded image
//!
//! Runs the same scan pipeline as the live loop with an always-due cadence,
//! on the blocking pool since both image decoding and QR detection are CPU
//! bound.

use crate::error::{Error, Result};
use crate::ledger_client::Ledger;
use crate::models::{CheckpointId, MovementRecord};
use crate::payload_builder::QrPayload;
use crate::pipeline::{self, Cadence, Forwarding, ScanResult};
use crate::vision::{Frame, SymbolDecoder};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;

/// Body of `POST /upload_image_and_decode`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDecodeResponse {
    pub found: bool,
    /// Decoded object, or the raw text for non-JSON payloads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_to_backend: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_sent: Option<MovementRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl UploadDecodeResponse {
    pub fn not_found() -> Self {
        Self {
            found: false,
            data: None,
            sent_to_backend: None,
            payload_sent: None,
            http_status: None,
        }
    }

    fn text(raw: String) -> Self {
        Self {
            found: true,
            data: Some(Value::String(raw)),
            sent_to_backend: Some(false),
            payload_sent: None,
            http_status: None,
        }
    }
}

/// Validate the checkpoint field before any image work
pub fn parse_checkpoint(raw: Option<&str>) -> Result<CheckpointId> {
    let raw = raw.ok_or_else(|| Error::InvalidRequest("idPonto is required".to_string()))?;
    raw.parse::<CheckpointId>()
        .map_err(|e| Error::InvalidRequest(e.to_string()))
}

/// Decode one uploaded image and forward a structured payload once
pub async fn decode_uploaded_image<L: Ledger>(
    decoder: Arc<dyn SymbolDecoder>,
    ledger: Arc<L>,
    image: Vec<u8>,
    checkpoint: Option<&str>,
) -> Result<UploadDecodeResponse> {
    let checkpoint = parse_checkpoint(checkpoint)?;
    let runtime = Handle::current();

    let scan = tokio::task::spawn_blocking(move || -> Result<ScanResult> {
        let frame = Frame::from_encoded(&image).map_err(|e| Error::InvalidImage(e.to_string()))?;
        Ok(runtime.block_on(pipeline::scan(
            decoder.as_ref(),
            &frame,
            &mut Cadence::always(),
            Instant::now(),
            checkpoint,
            ledger.as_ref(),
        )))
    })
    .await
    .map_err(|e| Error::Internal(format!("decode task failed: {}", e)))??;

    let detection = match scan {
        ScanResult::Detected(detection) => detection,
        ScanResult::NoSymbol | ScanResult::NotDue => {
            tracing::info!(checkpoint_id = %checkpoint, "No QR code in uploaded image");
            return Ok(UploadDecodeResponse::not_found());
        }
    };

    match (detection.payload, detection.forwarding) {
        (_, Forwarding::Rejected(e)) => Err(e.into()),
        (QrPayload::Structured(map), Forwarding::Submitted(outcome)) => Ok(UploadDecodeResponse {
            found: true,
            data: Some(Value::Object(map)),
            sent_to_backend: Some(outcome.accepted),
            payload_sent: Some(outcome.record_sent),
            http_status: outcome.http_status,
        }),
        (QrPayload::PlainText(raw) | QrPayload::Unparseable(raw), _) => Ok(UploadDecodeResponse::text(raw)),
        (QrPayload::Structured(_), Forwarding::NotStructured) => Err(Error::Internal(
            "structured payload was not forwarded".to_string(),
        )),
    }
}
