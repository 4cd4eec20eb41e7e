//! Carrier image buffers shared by the encoder, the capture source and
//! the analyzer.
//!
//! A [`CarrierImage`] is one full-resolution picture: either rendered by
//! the frame codec for display, or captured from a camera for analysis.
//! Rendered images are always [`PixelFormat::Rgb8`]; captured images keep
//! whatever layout the device produced.

use crate::error::DovError;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for carrier images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

// ── CarrierImage ─────────────────────────────────────────────────

/// An owned, uncompressed picture.
///
/// The `data` buffer holds `height` rows of `stride` bytes each.
/// `stride` may be larger than `width * bytes_per_pixel` for captures
/// whose rows are padded by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierImage {
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl CarrierImage {
    /// A black image with tightly packed rows.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = width * format.bytes_per_pixel() as u32;
        Self {
            width,
            height,
            stride,
            format,
            data: vec![0; stride as usize * height as usize],
        }
    }

    /// An RGB image filled with a single colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut image = Self::new(width, height, PixelFormat::Rgb8);
        for px in image.data.chunks_exact_mut(3) {
            px.copy_from_slice(&rgb);
        }
        image
    }

    /// Wrap a raw buffer handed over by a capture device.
    pub fn from_raw(
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, DovError> {
        let min_stride = width as usize * format.bytes_per_pixel();
        if (stride as usize) < min_stride {
            return Err(DovError::Device(format!(
                "stride {stride} shorter than row width {min_stride}"
            )));
        }
        let expected = stride as usize * height as usize;
        if data.len() < expected {
            return Err(DovError::Device(format!(
                "image buffer too small: {} < {expected}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            stride,
            format,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Raw pixel bytes, `stride * height` long.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether `(x, y)` lies inside the image.
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64
    }

    /// Returns the pixel bytes at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let bpp = self.format.bytes_per_pixel();
        let offset = y as usize * self.stride as usize + x as usize * bpp;
        &self.data[offset..offset + bpp]
    }

    /// Integer luminance `(r + g + b) / 3` of the pixel at `(x, y)`.
    ///
    /// The three colour channels always occupy the first three bytes,
    /// and the sum does not depend on their order, so every format
    /// shares one code path.
    #[inline]
    pub fn luminance(&self, x: u32, y: u32) -> u32 {
        let px = self.pixel(x, y);
        (px[0] as u32 + px[1] as u32 + px[2] as u32) / 3
    }

    /// The `(r, g, b)` components of the pixel at `(x, y)`.
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let px = self.pixel(x, y);
        match self.format {
            PixelFormat::Bgra8 => [px[2], px[1], px[0]],
            PixelFormat::Rgba8 | PixelFormat::Rgb8 => [px[0], px[1], px[2]],
        }
    }

    /// Paint one pixel. Alpha, where present, is set opaque.
    pub fn set_rgb(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        let bpp = self.format.bytes_per_pixel();
        let offset = y as usize * self.stride as usize + x as usize * bpp;
        let px = &mut self.data[offset..offset + bpp];
        match self.format {
            PixelFormat::Bgra8 => {
                px[0] = rgb[2];
                px[1] = rgb[1];
                px[2] = rgb[0];
                px[3] = 0xFF;
            }
            PixelFormat::Rgba8 => {
                px[..3].copy_from_slice(&rgb);
                px[3] = 0xFF;
            }
            PixelFormat::Rgb8 => px.copy_from_slice(&rgb),
        }
    }

    /// Fill a rectangle, clipped to the image bounds.
    pub fn fill_rect(&mut self, x: i64, y: i64, width: u32, height: u32, rgb: [u8; 3]) {
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + width as i64).min(self.width as i64);
        let y1 = (y + height as i64).min(self.height as i64);
        for py in y0..y1 {
            for px in x0..x1 {
                self.set_rgb(px as u32, py as u32, rgb);
            }
        }
    }

    /// Nearest-neighbour resample of `self` into `dst`, keeping `dst`'s
    /// dimensions. `dst` must share `self`'s pixel format.
    pub fn resize_nearest_into(&self, dst: &mut CarrierImage) {
        debug_assert_eq!(self.format, dst.format);
        let bpp = self.format.bytes_per_pixel();
        let (sw, sh) = (self.width as u64, self.height as u64);
        let (dw, dh) = (dst.width as u64, dst.height as u64);
        if sw == 0 || sh == 0 {
            return;
        }

        for y in 0..dh {
            let sy = (y * sh / dh) as usize;
            let src_row = sy * self.stride as usize;
            let dst_row = y as usize * dst.stride as usize;
            for x in 0..dw {
                let sx = (x * sw / dw) as usize;
                let s = src_row + sx * bpp;
                let d = dst_row + x as usize * bpp;
                dst.data[d..d + bpp].copy_from_slice(&self.data[s..s + bpp]);
            }
        }
    }

    /// Tightly packed RGB bytes, for handing to image encoders.
    pub fn to_rgb8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            for x in 0..self.width {
                out.extend_from_slice(&self.rgb(x, y));
            }
        }
        out
    }
}

// ── Tests ────────────────────────────────────────────────────────
