//! Payload Builder
//!
//! Turns a decoded QR payload plus the station's checkpoint into the
//! MovementRecord posted to the ledger.
//!
//! - checkpoint always comes from the caller, never from the tag
//! - timestamp is generated here, never copied from the tag
//! - movement id is left for the ledger to assign

use crate::models::{CheckpointId, MovementRecord, TIMESTAMP_FORMAT};
use chrono::{Local, NaiveDateTime};
use serde_json::Value;

/// Key carrying the asset identifier inside a QR payload
pub const ASSET_ID_KEY: &str = "idMoto";

/// Structured QR content: string keys to scalar values
pub type StructuredPayload = serde_json::Map<String, Value>;

/// Decoded QR content, classified once at decode time
#[derive(Debug, Clone, PartialEq)]
pub enum QrPayload {
    /// JSON object
    Structured(StructuredPayload),
    /// Free text, never forwarded
    PlainText(String),
    /// Looks like JSON but is broken, or is JSON that is not an object
    Unparseable(String),
}

impl QrPayload {
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => QrPayload::Structured(map),
            Ok(_) => QrPayload::Unparseable(raw.to_string()),
            Err(_) => {
                let trimmed = raw.trim_start();
                if trimmed.starts_with('{') || trimmed.starts_with('[') {
                    QrPayload::Unparseable(raw.to_string())
                } else {
                    QrPayload::PlainText(raw.to_string())
                }
            }
        }
    }

    pub fn as_structured(&self) -> Option<&StructuredPayload> {
        match self {
            QrPayload::Structured(map) => Some(map),
            _ => None,
        }
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            QrPayload::Structured(_) => "structured",
            QrPayload::PlainText(_) => "plain_text",
            QrPayload::Unparseable(_) => "unparseable",
        }
    }
}

/// Payload or checkpoint rejected before anything is sent
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("QR payload has no 'idMoto' key")]
    MissingAssetId,

    #[error("QR payload 'idMoto' is not a usable identifier: {0}")]
    InvalidAssetId(String),

    #[error("checkpoint id must be a positive integer, got '{0}'")]
    InvalidCheckpoint(String),
}

/// Build a MovementRecord stamped with the current local time
pub fn build(
    payload: &StructuredPayload,
    checkpoint_id: CheckpointId,
) -> Result<MovementRecord, ValidationError> {
    build_at(payload, checkpoint_id, Local::now().naive_local())
}

/// Build a MovementRecord stamped with `now`
pub fn build_at(
    payload: &StructuredPayload,
    checkpoint_id: CheckpointId,
    now: NaiveDateTime,
) -> Result<MovementRecord, ValidationError> {
    let asset_id = asset_id(payload)?;

    Ok(MovementRecord {
        movement_id: None,
        asset_id,
        checkpoint_id,
        timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
    })
}

fn asset_id(payload: &StructuredPayload) -> Result<String, ValidationError> {
    let value = payload
        .get(ASSET_ID_KEY)
        .ok_or(ValidationError::MissingAssetId)?;

    let id = match value {
        Value::String(s) => s.clone(),
        // Numeric tags are accepted and normalised to their decimal form
        Value::Number(n) if n.is_i64() || n.is_u64() => n.to_string(),
        other => return Err(ValidationError::InvalidAssetId(other.to_string())),
    };

    // blank ids are rejected, anything else is forwarded as written
    if id.trim().is_empty() {
        return Err(ValidationError::InvalidAssetId("empty".to_string()));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn structured(value: Value) -> StructuredPayload {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 10)
            .unwrap()
            .and_hms_opt(8, 30, 5)
            .unwrap()
    }

    #[test]
    fn test_parse_classifies_payloads() {
        assert!(matches!(
            QrPayload::parse(r#"{"idMoto":"MOTO-001"}"#),
            QrPayload::Structured(_)
        ));
        assert_eq!(
            QrPayload::parse("hello world"),
            QrPayload::PlainText("hello world".to_string())
        );
        assert!(matches!(QrPayload::parse(r#"{"idMoto": "#), QrPayload::Unparseable(_)));
        assert!(matches!(QrPayload::parse("[1, 2]"), QrPayload::Unparseable(_)));
        assert!(matches!(QrPayload::parse("42"), QrPayload::Unparseable(_)));
    }

    #[test]
    fn test_build_scenario_moto_001() {
        let payload = structured(json!({"idMoto": "MOTO-001"}));
        let checkpoint = CheckpointId::new(2).unwrap();

        let record = build_at(&payload, checkpoint, at()).unwrap();

        assert_eq!(record.movement_id, None);
        assert_eq!(record.asset_id, "MOTO-001");
        assert_eq!(record.checkpoint_id.get(), 2);
        assert_eq!(record.timestamp, "2026-01-10T08:30:05");
    }

    #[test]
    fn test_checkpoint_comes_from_caller_not_tag() {
        let payload = structured(json!({
            "idMovimentacao": 5,
            "idMoto": "MOTO-001",
            "idPonto": 9,
            "dataHora": "2020-01-01T00:00:00"
        }));

        for station in [1, 2, 9, 150] {
            let checkpoint = CheckpointId::new(station).unwrap();
            let record = build_at(&payload, checkpoint, at()).unwrap();
            assert_eq!(record.checkpoint_id, checkpoint);
            assert_eq!(record.movement_id, None);
            assert_eq!(record.timestamp, "2026-01-10T08:30:05");
        }
    }

    #[test]
    fn test_missing_asset_id_is_validation_error() {
        let payload = structured(json!({"idPonto": 2}));
        let result = build(&payload, CheckpointId::new(2).unwrap());
        assert_eq!(result, Err(ValidationError::MissingAssetId));
    }

    #[test]
    fn test_unusable_asset_ids() {
        let checkpoint = CheckpointId::new(1).unwrap();
        for bad in [json!(""), json!("   "), json!(null), json!(true), json!(1.5)] {
            let payload = structured(json!({ "idMoto": bad }));
            assert!(matches!(
                build(&payload, checkpoint),
                Err(ValidationError::InvalidAssetId(_))
            ));
        }

        let numeric = structured(json!({"idMoto": 17}));
        assert_eq!(build(&numeric, checkpoint).unwrap().asset_id, "17");
    }

    #[test]
    fn test_asset_id_is_copied_verbatim() {
        let checkpoint = CheckpointId::new(1).unwrap();
        let payload = structured(json!({"idMoto": " MOTO-001 "}));
        assert_eq!(build(&payload, checkpoint).unwrap().asset_id, " MOTO-001 ");
    }
}
