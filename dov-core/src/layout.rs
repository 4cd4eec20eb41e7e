//! Frame geometry.
//!
//! A carrier image is divided into a grid of `block_size` squares inside
//! a safe margin:
//!
//! ```text
//! ┌──────────────────────── frame ─────────────────────────┐
//! │  margin                                                │
//! │   ┌■■┬──────────────── content ───────────────────┬□□┐ │
//! │   │■■│                                            │□□│ │
//! │   ├──┴── header rows (80 bits, full grid width) ──┴──┤ │
//! │   │  ┌────────────── data area ──────────────────┐   │ │
//! │   │  │  row-major payload bits                   │   │ │
//! │   │  └───────────────────────────────────────────┘   │ │
//! │   │  checksum rows (reserved)                        │ │
//! │   ├□□┐                                            ┌■■┤ │
//! │   └□□┴────────────────────────────────────────────┴■■┘ │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything is derived from [`LayoutConfig`]; no coordinate is written
//! by hand anywhere else in the crate.

use serde::{Deserialize, Serialize};

use crate::error::DovError;
use crate::header::HEADER_SIZE;

/// Bytes reserved at the end of every DATA payload for the CRC-32.
pub const CRC_SIZE: usize = 4;

// ── LayoutConfig ─────────────────────────────────────────────────

/// User-facing geometry parameters, in pixels unless noted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Canonical frame width.
    pub frame_width: u32,
    /// Canonical frame height.
    pub frame_height: u32,
    /// Side of one bit block.
    pub block_size: u32,
    /// Border left untouched around the content area.
    pub safe_margin: u32,
    /// Side of each corner marker.
    pub corner_size: u32,
    /// Block rows reserved for the frame header.
    pub header_rows: u32,
    /// Block rows reserved above the bottom markers.
    pub checksum_rows: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            frame_width: 1920,
            frame_height: 1080,
            block_size: 8,
            safe_margin: 16,
            corner_size: 32,
            header_rows: 3,
            checksum_rows: 2,
        }
    }
}

// ── Corner ───────────────────────────────────────────────────────

/// One synchronisation marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corner {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Top-left and bottom-right markers are dark, the others light.
    pub dark: bool,
}

// ── Layout ───────────────────────────────────────────────────────

/// Validated geometry with every derived quantity precomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    frame_width: u32,
    frame_height: u32,
    block_size: u32,
    safe_margin: u32,
    corner_size: u32,
    grid_cols: u32,
    grid_rows: u32,
    corner_blocks: u32,
    header_start_row: u32,
    data_start_row: u32,
    data_rows: u32,
    data_cols: u32,
}

impl Layout {
    /// Validate `config` and derive the block grid.
    pub fn new(config: &LayoutConfig) -> Result<Self, DovError> {
        let bs = config.block_size;
        if bs == 0 {
            return Err(DovError::InvalidLayout("block_size must be > 0".into()));
        }
        if config.safe_margin % bs != 0 {
            return Err(DovError::InvalidLayout(format!(
                "safe_margin {} is not a multiple of block_size {bs}",
                config.safe_margin
            )));
        }
        if config.corner_size == 0 || config.corner_size % bs != 0 {
            return Err(DovError::InvalidLayout(format!(
                "corner_size {} must be a positive multiple of block_size {bs}",
                config.corner_size
            )));
        }

        let content_w = config.frame_width as i64 - 2 * config.safe_margin as i64;
        let content_h = config.frame_height as i64 - 2 * config.safe_margin as i64;
        if content_w <= 0 || content_h <= 0 {
            return Err(DovError::InvalidLayout("content area is empty".into()));
        }

        let grid_cols = content_w / bs as i64;
        let grid_rows = content_h / bs as i64;
        let corner_blocks = (config.corner_size / bs) as i64;
        let header_start_row = corner_blocks;
        let data_start_row = header_start_row + config.header_rows as i64;
        let data_end_row = grid_rows - corner_blocks - config.checksum_rows as i64;
        let data_rows = data_end_row - data_start_row;
        let data_cols = grid_cols - 2 * corner_blocks;

        if data_rows <= 0 || data_cols <= 0 {
            return Err(DovError::InvalidLayout(format!(
                "data area is empty ({data_cols} cols x {data_rows} rows)"
            )));
        }
        if (config.header_rows as i64) * grid_cols < (HEADER_SIZE * 8) as i64 {
            return Err(DovError::InvalidLayout(format!(
                "{} header rows of {grid_cols} blocks cannot hold {} header bits",
                config.header_rows,
                HEADER_SIZE * 8
            )));
        }
        if ((data_rows * data_cols) / 8) as usize <= CRC_SIZE {
            return Err(DovError::InvalidLayout(
                "data area too small to carry a CRC-protected payload".into(),
            ));
        }

        Ok(Self {
            frame_width: config.frame_width,
            frame_height: config.frame_height,
            block_size: bs,
            safe_margin: config.safe_margin,
            corner_size: config.corner_size,
            grid_cols: grid_cols as u32,
            grid_rows: grid_rows as u32,
            corner_blocks: corner_blocks as u32,
            header_start_row: header_start_row as u32,
            data_start_row: data_start_row as u32,
            data_rows: data_rows as u32,
            data_cols: data_cols as u32,
        })
    }

    pub fn frame_width(&self) -> u32 {
        self.frame_width
    }

    pub fn frame_height(&self) -> u32 {
        self.frame_height
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn safe_margin(&self) -> u32 {
        self.safe_margin
    }

    pub fn corner_size(&self) -> u32 {
        self.corner_size
    }

    /// Content area width in pixels.
    pub fn content_width(&self) -> u32 {
        self.frame_width - 2 * self.safe_margin
    }

    /// Content area height in pixels.
    pub fn content_height(&self) -> u32 {
        self.frame_height - 2 * self.safe_margin
    }

    pub fn grid_cols(&self) -> u32 {
        self.grid_cols
    }

    pub fn grid_rows(&self) -> u32 {
        self.grid_rows
    }

    pub fn data_cols(&self) -> u32 {
        self.data_cols
    }

    pub fn data_rows(&self) -> u32 {
        self.data_rows
    }

    /// Number of payload blocks (bits) per carrier image.
    pub fn data_blocks(&self) -> usize {
        self.data_rows as usize * self.data_cols as usize
    }

    /// Raw payload bytes per carrier image.
    pub fn data_bytes(&self) -> usize {
        self.data_blocks() / 8
    }

    /// Usable chunk bytes per DATA frame, after the trailing CRC-32.
    pub fn payload_capacity(&self) -> usize {
        self.data_bytes() - CRC_SIZE
    }

    // ── Coordinate mapping ───────────────────────────────────────

    /// Block holding header bit `bit`, relative to the content area.
    pub fn header_bit_to_block(&self, bit: usize) -> (u32, u32) {
        let cols = self.grid_cols as usize;
        (
            (bit % cols) as u32,
            self.header_start_row + (bit / cols) as u32,
        )
    }

    /// Block holding payload bit `bit`, relative to the content area.
    pub fn data_bit_to_block(&self, bit: usize) -> (u32, u32) {
        let cols = self.data_cols as usize;
        (
            self.corner_blocks + (bit % cols) as u32,
            self.data_start_row + (bit / cols) as u32,
        )
    }

    /// Pixel origin of block `(block_x, block_y)`.
    pub fn block_to_pixel(&self, block_x: u32, block_y: u32) -> (u32, u32) {
        (
            self.safe_margin + block_x * self.block_size,
            self.safe_margin + block_y * self.block_size,
        )
    }

    /// The four markers: top-left, top-right, bottom-left, bottom-right.
    pub fn corners(&self) -> [Corner; 4] {
        let m = self.safe_margin;
        let c = self.corner_size;
        let right = self.frame_width - m - c;
        let bottom = self.frame_height - m - c;
        [
            Corner { x: m, y: m, dark: true },
            Corner { x: right, y: m, dark: false },
            Corner { x: m, y: bottom, dark: false },
            Corner { x: right, y: bottom, dark: true },
        ]
    }
}

// ── Tests ────────────────────────────────────────────────────────
