//! Corner-marker search.
//!
//! The encoder paints the top-left and bottom-right markers dark and the
//! other two light. The detector slides the expected marker positions
//! over a small square of candidate offsets and accepts the first one at
//! which all four markers read with the right polarity.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::image::CarrierImage;
use crate::layout::Layout;

/// Pixel translation of a captured frame relative to the canonical one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Offset {
    pub x: i32,
    pub y: i32,
}

impl Offset {
    pub const ZERO: Offset = Offset { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

// ── DetectorConfig ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Largest translation tried on each axis, in pixels.
    pub search_range: i32,
    /// A dark marker must average strictly below this.
    pub dark_threshold: u32,
    /// A light marker must average strictly above this.
    pub light_threshold: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            search_range: 8,
            dark_threshold: 64,
            light_threshold: 192,
        }
    }
}

// ── FrameDetector ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FrameDetector {
    layout: Layout,
    config: DetectorConfig,
}

impl FrameDetector {
    pub fn new(layout: Layout, config: DetectorConfig) -> Self {
        Self { layout, config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Locate the frame in `image`.
    ///
    /// A strict pass runs first; if it fails, one relaxed pass with
    /// thresholds pulled toward mid-grey and twice the radius follows.
    pub fn detect(&self, image: &CarrierImage) -> Option<Offset> {
        let cfg = &self.config;
        if let Some(offset) = self.search(
            image,
            cfg.search_range,
            cfg.dark_threshold,
            cfg.light_threshold,
        ) {
            return Some(offset);
        }

        let dark = cfg.dark_threshold.saturating_add(32).min(120);
        let light = cfg.light_threshold.saturating_sub(32).max(140);
        let found = self.search(image, cfg.search_range.saturating_mul(2), dark, light);
        if found.is_some() {
            trace!(?found, "markers found with relaxed thresholds");
        }
        found
    }

    fn search(&self, image: &CarrierImage, radius: i32, dark: u32, light: u32) -> Option<Offset> {
        for dy in outward(radius) {
            for dx in outward(radius) {
                if self.markers_match(image, dx, dy, dark, light) {
                    return Some(Offset::new(dx, dy));
                }
            }
        }
        None
    }

    fn markers_match(&self, image: &CarrierImage, dx: i32, dy: i32, dark: u32, light: u32) -> bool {
        let size = self.layout.corner_size();
        let sample = size / 2;
        let inset = size / 4;

        for corner in self.layout.corners() {
            let x = corner.x as i64 + inset as i64 + dx as i64;
            let y = corner.y as i64 + inset as i64 + dy as i64;
            let Some(avg) = average_luminance(image, x, y, sample) else {
                return false;
            };
            let ok = if corner.dark { avg < dark } else { avg > light };
            if !ok {
                return false;
            }
        }
        true
    }
}

/// `0, -1, +1, -2, +2, …` up to `±radius`.
fn outward(radius: i32) -> impl Iterator<Item = i32> {
    (0..=radius.max(0).saturating_mul(2)).map(|k| if k % 2 == 1 { -(k / 2) - 1 } else { k / 2 })
}

/// Mean luminance of the `size`-square at `(x, y)`, or `None` if any
/// part of it falls outside the image.
fn average_luminance(image: &CarrierImage, x: i64, y: i64, size: u32) -> Option<u32> {
    if size == 0 {
        return None;
    }
    let last = size as i64 - 1;
    if !image.contains(x, y) || !image.contains(x + last, y + last) {
        return None;
    }
    let (x, y) = (x as u32, y as u32);
    let mut sum: u64 = 0;
    for py in y..y + size {
        for px in x..x + size {
            sum += image.luminance(px, py) as u64;
        }
    }
    Some((sum / (size as u64 * size as u64)) as u32)
}

// ── Tests ────────────────────────────────────────────────────────
