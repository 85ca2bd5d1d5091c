//! QR Generator - encode a movement-shaped record as a PNG tag
//!
//! Stateless: form fields in, PNG bytes out. The JSON written into the
//! symbol uses the same field names the ledger expects.

use crate::error::{Error, Result};
use crate::models::TIMESTAMP_FORMAT;
use crate::vision::Frame;
use chrono::Local;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

/// Pixels per QR module; the renderer adds the standard 4-module quiet zone
const MODULE_PIXELS: u32 = 8;

/// Form accepted by the generation endpoint; every field is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QrRecordForm {
    #[serde(rename = "idMovimentacao", default, deserialize_with = "empty_as_none")]
    pub movement_id: Option<i64>,
    #[serde(rename = "idMoto", default, deserialize_with = "empty_as_none")]
    pub asset_id: Option<String>,
    #[serde(rename = "idPonto", default, deserialize_with = "empty_as_none")]
    pub checkpoint_id: Option<i64>,
    #[serde(rename = "dataHora", default, deserialize_with = "empty_as_none")]
    pub timestamp: Option<String>,
}

fn empty_as_none<'de, D, T>(de: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = Option::<String>::deserialize(de)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse::<T>().map(Some).map_err(serde::de::Error::custom),
    }
}

impl QrRecordForm {
    /// JSON text to encode; a missing timestamp is filled with local now
    pub fn to_payload_json(&self) -> Result<String> {
        let mut record = self.clone();
        if record.timestamp.is_none() {
            record.timestamp = Some(Local::now().format(TIMESTAMP_FORMAT).to_string());
        }
        Ok(serde_json::to_string(&record)?)
    }
}

/// Grayscale rendering of `content`, quiet zone included
fn render_image(content: &str) -> Result<GrayImage> {
    let code = QrCode::with_error_correction_level(content.as_bytes(), EcLevel::H)
        .map_err(|e| Error::QrEncode(e.to_string()))?;

    Ok(code
        .render::<Luma<u8>>()
        .module_dimensions(MODULE_PIXELS, MODULE_PIXELS)
        .quiet_zone(true)
        .build())
}

/// Render `content` as an in-memory frame
pub fn render_frame(content: &str) -> Result<Frame> {
    let img = render_image(content)?;
    let (width, height) = img.dimensions();
    Frame::from_raw(width, height, img.into_raw())
        .ok_or_else(|| Error::Internal("rendered QR has inconsistent size".to_string()))
}

/// Render `content` as PNG bytes
pub fn render_png(content: &str) -> Result<Vec<u8>> {
    let img = render_image(content)?;

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| Error::Internal(format!("PNG encode failed: {}", e)))?;
    Ok(png)
}

/// Build the payload for `form` and render it as PNG
pub fn generate(form: &QrRecordForm) -> Result<Vec<u8>> {
    let json = form.to_payload_json()?;
    tracing::debug!(payload = %json, "Generating QR tag");
    render_png(&json)
}
