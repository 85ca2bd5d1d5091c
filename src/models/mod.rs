//! Shared data models
//!
//! Types exchanged between the payload builder, the ledger client, the
//! detection loop and the web API.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::payload_builder::ValidationError;

/// Timestamp layout sent to the ledger (ISO-8601, local time, no offset)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Physical scan location, supplied by the station (never by the tag)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct CheckpointId(i64);

impl CheckpointId {
    /// Station default when nothing is configured
    pub const DEFAULT: CheckpointId = CheckpointId(1);

    /// Create a checkpoint id, rejecting zero and negative values
    pub fn new(value: i64) -> Result<Self, ValidationError> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(ValidationError::InvalidCheckpoint(value.to_string()))
        }
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for CheckpointId {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CheckpointId> for i64 {
    fn from(id: CheckpointId) -> Self {
        id.0
    }
}

impl FromStr for CheckpointId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value: i64 = trimmed
            .parse()
            .map_err(|_| ValidationError::InvalidCheckpoint(trimmed.to_string()))?;
        Self::new(value)
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical movement record posted to the ledger
///
/// Field names follow the ledger's JSON contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    /// Assigned by the ledger; always null on submission
    #[serde(rename = "idMovimentacao")]
    pub movement_id: Option<i64>,
    /// Asset (vehicle) identifier read from the tag
    #[serde(rename = "idMoto")]
    pub asset_id: String,
    /// Checkpoint where the scan happened
    #[serde(rename = "idPonto")]
    pub checkpoint_id: CheckpointId,
    /// Generated at build time, `TIMESTAMP_FORMAT`
    #[serde(rename = "dataHora")]
    pub timestamp: String,
}

/// Result of one submission attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    /// True only for HTTP 201
    pub accepted: bool,
    /// Present whenever the ledger answered at all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub record_sent: MovementRecord,
}

impl SubmissionOutcome {
    pub fn from_status(record: MovementRecord, status: u16) -> Self {
        Self {
            accepted: status == 201,
            http_status: Some(status),
            record_sent: record,
        }
    }

    pub fn transport_failure(record: MovementRecord) -> Self {
        Self {
            accepted: false,
            http_status: None,
            record_sent: record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> MovementRecord {
        MovementRecord {
            movement_id: None,
            asset_id: "MOTO-001".to_string(),
            checkpoint_id: CheckpointId::new(2).unwrap(),
            timestamp: "2026-01-10T08:30:00".to_string(),
        }
    }

    #[test]
    fn test_checkpoint_rejects_non_positive() {
        assert!(CheckpointId::new(0).is_err());
        assert!(CheckpointId::new(-3).is_err());
        assert_eq!(CheckpointId::new(7).unwrap().get(), 7);
    }

    #[test]
    fn test_checkpoint_from_str() {
        assert_eq!(" 2 ".parse::<CheckpointId>().unwrap().get(), 2);
        assert!("abc".parse::<CheckpointId>().is_err());
        assert!("".parse::<CheckpointId>().is_err());
        assert!("1.5".parse::<CheckpointId>().is_err());
    }

    #[test]
    fn test_movement_record_wire_names() {
        let value = serde_json::to_value(record()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "idMovimentacao": null,
                "idMoto": "MOTO-001",
                "idPonto": 2,
                "dataHora": "2026-01-10T08:30:00"
            })
        );
    }

    #[test]
    fn test_outcome_only_201_is_accepted() {
        assert!(SubmissionOutcome::from_status(record(), 201).accepted);
        assert!(!SubmissionOutcome::from_status(record(), 200).accepted);
        let outcome = SubmissionOutcome::from_status(record(), 500);
        assert_eq!(outcome.http_status, Some(500));

        let failed = SubmissionOutcome::transport_failure(record());
        assert!(!failed.accepted);
        assert!(failed.http_status.is_none());
    }
}
