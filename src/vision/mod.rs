//! Vision - camera, QR decoding and visual tracking capabilities
//!
//! ## Responsibilities
//!
//! - Grayscale frame type shared by every backend
//! - Capability traits consumed by the detection loop
//! - Default backends: ffmpeg camera, rqrr decoder, template tracker
//!
//! The loop only sees the traits; backends are chosen at startup.

mod camera;
mod decoder;
mod tracker;

pub use camera::{FfmpegCamera, FfmpegCameraConfig, FfmpegCameraProvider};
pub use decoder::RqrrDecoder;
pub use tracker::{TemplateTracker, TemplateTrackerFactory};

use serde::Serialize;

/// Camera cannot be opened or read
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("camera could not be opened: {0}")]
    Open(String),

    #[error("camera frame read failed: {0}")]
    Read(String),
}

/// 8-bit grayscale frame, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    luma: Vec<u8>,
}

impl Frame {
    /// Wrap raw luma bytes; `None` when the buffer size does not match
    pub fn from_raw(width: u32, height: u32, luma: Vec<u8>) -> Option<Self> {
        if luma.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            luma,
        })
    }

    /// Uniform frame, mostly useful for tests
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            width,
            height,
            luma: vec![value; width as usize * height as usize],
        }
    }

    /// Decode an encoded still image (PNG, JPEG, ...) into a grayscale frame
    pub fn from_encoded(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let gray = image::load_from_memory(bytes)?.to_luma8();
        let (width, height) = gray.dimensions();
        Ok(Self {
            width,
            height,
            luma: gray.into_raw(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.luma[y as usize * self.width as usize + x as usize]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.luma
    }
}

/// Axis-aligned rectangle in frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Smallest box enclosing `points`, clipped to the frame
    pub fn enclosing<I>(points: I, frame_width: u32, frame_height: u32) -> Option<Self>
    where
        I: IntoIterator<Item = (i32, i32)>,
    {
        let mut iter = points.into_iter();
        let (fx, fy) = iter.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (fx, fy, fx, fy);
        for (x, y) in iter {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        let x0 = min_x.clamp(0, frame_width as i32) as u32;
        let y0 = min_y.clamp(0, frame_height as i32) as u32;
        let x1 = max_x.clamp(0, frame_width as i32) as u32;
        let y1 = max_y.clamp(0, frame_height as i32) as u32;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// True when the box lies fully inside a frame of the given size
    pub fn fits(&self, frame_width: u32, frame_height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x + self.width <= frame_width
            && self.y + self.height <= frame_height
    }
}

/// One decoded QR symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub text: String,
    pub bbox: BoundingBox,
}

/// Exclusively owned, opened camera
///
/// Dropping the value releases the device.
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<Frame, DeviceError>;
}

/// Opens the camera at loop entry
pub trait CameraProvider: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>, DeviceError>;
}

/// QR symbol decoding; symbols are returned in library order
pub trait SymbolDecoder: Send + Sync {
    fn decode(&self, frame: &Frame) -> Vec<Symbol>;
}

/// Visual tracker bound to one target
pub trait Tracker: Send {
    /// `Some` while the tracker keeps its lock, `None` once it is lost
    fn update(&mut self, frame: &Frame) -> Option<BoundingBox>;
}

/// Creates a tracker initialised on `bbox` in `frame`
pub trait TrackerFactory: Send + Sync {
    fn create(&self, frame: &Frame, bbox: BoundingBox) -> Box<dyn Tracker>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_from_raw_checks_size() {
        assert!(Frame::from_raw(4, 2, vec![0; 8]).is_some());
        assert!(Frame::from_raw(4, 2, vec![0; 7]).is_none());
    }

    #[test]
    fn test_frame_pixel_indexing() {
        let frame = Frame::from_raw(3, 2, vec![0, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(frame.pixel(0, 0), 0);
        assert_eq!(frame.pixel(2, 0), 2);
        assert_eq!(frame.pixel(1, 1), 4);
    }

    #[test]
    fn test_enclosing_box_clips_to_frame() {
        let bbox = BoundingBox::enclosing([(10, 20), (50, 18), (52, 60), (8, 62)], 100, 100).unwrap();
        assert_eq!(bbox, BoundingBox::new(8, 18, 44, 44));

        let clipped = BoundingBox::enclosing([(-5, -5), (30, 30)], 20, 20).unwrap();
        assert_eq!(clipped, BoundingBox::new(0, 0, 20, 20));

        assert!(BoundingBox::enclosing(Vec::<(i32, i32)>::new(), 10, 10).is_none());
    }

    #[test]
    fn test_fits() {
        assert!(BoundingBox::new(0, 0, 10, 10).fits(10, 10));
        assert!(!BoundingBox::new(1, 0, 10, 10).fits(10, 10));
        assert!(!BoundingBox::new(0, 0, 0, 10).fits(10, 10));
    }
}
