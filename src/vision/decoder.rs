//! QR decoding backed by rqrr

use super::{BoundingBox, Frame, Symbol, SymbolDecoder};

/// Pure-Rust QR decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct RqrrDecoder;

impl RqrrDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl SymbolDecoder for RqrrDecoder {
    fn decode(&self, frame: &Frame) -> Vec<Symbol> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            width as usize,
            height as usize,
            |x, y| frame.pixel(x as u32, y as u32),
        );

        prepared
            .detect_grids()
            .into_iter()
            .filter_map(|grid| {
                let bbox =
                    BoundingBox::enclosing(grid.bounds.iter().map(|p| (p.x, p.y)), width, height)?;
                match grid.decode() {
                    Ok((_meta, text)) => Some(Symbol { text, bbox }),
                    Err(e) => {
                        tracing::debug!(error = %e, "QR grid found but not decodable");
                        None
                    }
                }
            })
            .collect()
    }
}
