//! Lightweight template tracker
//!
//! Keeps the patch under the initial box and looks for it in a small
//! window around the last position on every frame. Cheap enough to run on
//! each frame between two decodes.

use super::{BoundingBox, Frame, Tracker, TrackerFactory};

/// Pixels searched around the last position, in each direction
const DEFAULT_SEARCH_RADIUS: u32 = 24;
/// Offset step of the coarse pass; the fine pass covers this many pixels
/// around the coarse winner one by one
const SEARCH_STRIDE: usize = 4;
/// Pixel step used when comparing patches
const SAMPLE_STRIDE: u32 = 2;
/// Mean absolute difference above which the lock is considered lost
const DEFAULT_MAX_MEAN_DIFF: f32 = 40.0;

/// Builds `TemplateTracker`s
#[derive(Debug, Clone)]
pub struct TemplateTrackerFactory {
    search_radius: u32,
    max_mean_diff: f32,
}

impl TemplateTrackerFactory {
    pub fn new() -> Self {
        Self {
            search_radius: DEFAULT_SEARCH_RADIUS,
            max_mean_diff: DEFAULT_MAX_MEAN_DIFF,
        }
    }

    pub fn with_params(search_radius: u32, max_mean_diff: f32) -> Self {
        Self {
            search_radius,
            max_mean_diff,
        }
    }
}

impl Default for TemplateTrackerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerFactory for TemplateTrackerFactory {
    fn create(&self, frame: &Frame, bbox: BoundingBox) -> Box<dyn Tracker> {
        Box::new(TemplateTracker::new(
            frame,
            bbox,
            self.search_radius,
            self.max_mean_diff,
        ))
    }
}

/// Patch-matching tracker
pub struct TemplateTracker {
    template: Vec<u8>,
    bbox: BoundingBox,
    search_radius: u32,
    max_mean_diff: f32,
}

impl TemplateTracker {
    pub fn new(frame: &Frame, bbox: BoundingBox, search_radius: u32, max_mean_diff: f32) -> Self {
        let template = if bbox.fits(frame.width(), frame.height()) {
            let mut patch = Vec::with_capacity(bbox.width as usize * bbox.height as usize);
            for y in bbox.y..bbox.y + bbox.height {
                for x in bbox.x..bbox.x + bbox.width {
                    patch.push(frame.pixel(x, y));
                }
            }
            patch
        } else {
            Vec::new()
        };

        Self {
            template,
            bbox,
            search_radius,
            max_mean_diff,
        }
    }

    fn mean_diff(&self, frame: &Frame, origin_x: u32, origin_y: u32) -> f32 {
        let mut total: u64 = 0;
        let mut count: u64 = 0;
        let mut ty = 0;
        while ty < self.bbox.height {
            let mut tx = 0;
            while tx < self.bbox.width {
                let expected = self.template[(ty * self.bbox.width + tx) as usize];
                let actual = frame.pixel(origin_x + tx, origin_y + ty);
                total += expected.abs_diff(actual) as u64;
                count += 1;
                tx += SAMPLE_STRIDE;
            }
            ty += SAMPLE_STRIDE;
        }
        if count == 0 {
            return f32::MAX;
        }
        total as f32 / count as f32
    }

    /// Best (score, x, y) on a `step` grid within `radius` of `center`
    fn search(
        &self,
        frame: &Frame,
        center: (i64, i64),
        radius: i64,
        step: usize,
        limits: (i64, i64),
        mut best: Option<(f32, u32, u32)>,
    ) -> Option<(f32, u32, u32)> {
        let (cx, cy) = center;
        let (max_x, max_y) = limits;
        for dy in (-radius..=radius).step_by(step) {
            let y = cy + dy;
            if y < 0 || y > max_y {
                continue;
            }
            for dx in (-radius..=radius).step_by(step) {
                let x = cx + dx;
                if x < 0 || x > max_x {
                    continue;
                }
                let score = self.mean_diff(frame, x as u32, y as u32);
                if best.map_or(true, |(b, _, _)| score < b) {
                    best = Some((score, x as u32, y as u32));
                }
            }
        }
        best
    }
}

impl Tracker for TemplateTracker {
    fn update(&mut self, frame: &Frame) -> Option<BoundingBox> {
        if self.template.is_empty() {
            return None;
        }

        let max_x = frame.width() as i64 - self.bbox.width as i64;
        let max_y = frame.height() as i64 - self.bbox.height as i64;
        if max_x < 0 || max_y < 0 {
            return None;
        }
        let limits = (max_x, max_y);

        // coarse grid over the window, then every pixel around the coarse winner
        let origin = (self.bbox.x as i64, self.bbox.y as i64);
        let coarse = self.search(frame, origin, self.search_radius as i64, SEARCH_STRIDE, limits, None);
        let best = coarse.and_then(|(_, x, y)| {
            self.search(frame, (x as i64, y as i64), SEARCH_STRIDE as i64, 1, limits, coarse)
        });

        match best {
            Some((score, x, y)) if score <= self.max_mean_diff => {
                self.bbox.x = x;
                self.bbox.y = y;
                Some(self.bbox)
            }
            _ => None,
        }
    }
}
