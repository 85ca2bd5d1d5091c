//! Checkpoint Tracker Library
//!
//! Reads vehicle QR tags at a fixed checkpoint and records each sighting
//! as a movement in the ledger.
//!
//! ## Architecture
//!
//! 1. Vision - camera, QR decoder and tracker capabilities
//! 2. PayloadBuilder - QR payload → MovementRecord
//! 3. LedgerClient - record submission
//! 4. Pipeline - decode → validate → build → submit, shared by both paths
//! 5. DetectionLoop - live camera state machine
//! 6. SessionController - start/stop/status of the live loop
//! 7. QrGenerator - tag rendering
//! 8. WebAPI - REST endpoints and the single-shot upload path

pub mod detection_loop;
pub mod error;
pub mod ledger_client;
pub mod models;
pub mod payload_builder;
pub mod pipeline;
pub mod qr_generator;
pub mod session_controller;
pub mod state;
pub mod vision;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
