//! LedgerClient - Movement ledger adapter
//!
//! ## Responsibilities
//!
//! - POST one MovementRecord per decode event (no retry)
//! - Bounded wait before declaring a transport failure
//! - Classify the answer: 201 accepted, anything else rejected
//!
//! Failures never escape as errors; they are folded into the
//! SubmissionOutcome so a failed post cannot stop the camera loop.

use crate::error::Result;
use crate::models::{MovementRecord, SubmissionOutcome};
use std::future::Future;
use std::time::Duration;

/// Default bounded wait for one submission
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Something that accepts movement records
///
/// The live loop and the upload handler are generic over this so tests can
/// substitute an in-memory ledger.
pub trait Ledger: Send + Sync + 'static {
    fn submit(&self, record: MovementRecord) -> impl Future<Output = SubmissionOutcome> + Send;
}

/// HTTP ledger client
pub struct LedgerClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl LedgerClient {
    /// Create client with the default 5 second timeout
    pub fn new(url: String) -> Result<Self> {
        Self::with_timeout(url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create client with custom timeout
    pub fn with_timeout(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    /// Post a record once and classify the result
    pub async fn post_record(&self, record: MovementRecord) -> SubmissionOutcome {
        match self.client.post(&self.url).json(&record).send().await {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                let outcome = SubmissionOutcome::from_status(record, status.as_u16());

                if outcome.accepted {
                    tracing::info!(
                        asset_id = %outcome.record_sent.asset_id,
                        checkpoint_id = %outcome.record_sent.checkpoint_id,
                        status = status.as_u16(),
                        "Movement accepted by ledger"
                    );
                } else {
                    tracing::warn!(
                        asset_id = %outcome.record_sent.asset_id,
                        checkpoint_id = %outcome.record_sent.checkpoint_id,
                        status = status.as_u16(),
                        body = %body,
                        "Movement rejected by ledger"
                    );
                }
                outcome
            }
            Err(e) => {
                tracing::warn!(
                    asset_id = %record.asset_id,
                    url = %self.url,
                    timeout_ms = self.timeout.as_millis() as u64,
                    error = %e,
                    "Ledger unreachable"
                );
                SubmissionOutcome::transport_failure(record)
            }
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Ledger for LedgerClient {
    async fn submit(&self, record: MovementRecord) -> SubmissionOutcome {
        self.post_record(record).await
    }
}
