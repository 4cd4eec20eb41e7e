//! One bit per solid block, plus MSB-first byte/bit packing.

use crate::error::DovError;
use crate::image::CarrierImage;
use crate::layout::Layout;

pub const BLACK: [u8; 3] = [0x00, 0x00, 0x00];
pub const WHITE: [u8; 3] = [0xFF, 0xFF, 0xFF];

/// Mean luminance at or above which a block reads as `1`.
const BIT_THRESHOLD: u32 = 128;

/// Paint block `(block_x, block_y)` black for `0`, white for `1`.
pub fn encode_block(image: &mut CarrierImage, layout: &Layout, block_x: u32, block_y: u32, bit: u8) {
    let (px, py) = layout.block_to_pixel(block_x, block_y);
    let bs = layout.block_size();
    let colour = if bit != 0 { WHITE } else { BLACK };
    image.fill_rect(px as i64, py as i64, bs, bs, colour);
}

/// Read the block whose top-left pixel is `(px, py)`.
///
/// The block rectangle is clipped to the image and the visible pixels
/// averaged; a block entirely outside the image reads as `0`.
pub fn decode_block_at(image: &CarrierImage, px: i64, py: i64, block_size: u32) -> u8 {
    let x0 = px.max(0);
    let y0 = py.max(0);
    let x1 = (px + block_size as i64).min(image.width() as i64);
    let y1 = (py + block_size as i64).min(image.height() as i64);
    if x0 >= x1 || y0 >= y1 {
        return 0;
    }

    let mut sum: u64 = 0;
    for y in y0..y1 {
        for x in x0..x1 {
            sum += image.luminance(x as u32, y as u32) as u64;
        }
    }
    let count = ((x1 - x0) * (y1 - y0)) as u64;
    u8::from(sum / count >= BIT_THRESHOLD as u64)
}

/// Expand bytes into bits, most significant bit first.
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        for shift in (0..8).rev() {
            bits.push((byte >> shift) & 1);
        }
    }
    bits
}

/// Pack MSB-first bits into bytes. Any non-zero entry counts as `1`.
pub fn bits_to_bytes(bits: &[u8]) -> Result<Vec<u8>, DovError> {
    if bits.len() % 8 != 0 {
        return Err(DovError::InvalidBitCount(bits.len()));
    }
    Ok(bits
        .chunks_exact(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, &b| (acc << 1) | u8::from(b != 0)))
        .collect())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutConfig;

    #[test]
    fn bit_packing_round_trip() {
        let bytes = [0x00, 0xFF, 0xA5, 0x3C];
        let bits = bytes_to_bits(&bytes);
        assert_eq!(bits.len(), 32);
        assert_eq!(&bits[16..24], &[1, 0, 1, 0, 0, 1, 0, 1]);
        assert_eq!(bits_to_bytes(&bits).unwrap(), bytes);
    }

    #[test]
    fn bits_to_bytes_rejects_partial_byte() {
        let err = bits_to_bytes(&[1, 0, 1]).unwrap_err();
        assert!(matches!(err, DovError::InvalidBitCount(3)));
    }

    #[test]
    fn encoded_block_decodes() {
        let layout = Layout::new(&LayoutConfig::default()).unwrap();
        let mut image = CarrierImage::filled(1920, 1080, [0x60, 0x60, 0x60]);
        encode_block(&mut image, &layout, 10, 10, 1);
        encode_block(&mut image, &layout, 11, 10, 0);

        let (x, y) = layout.block_to_pixel(10, 10);
        assert_eq!(decode_block_at(&image, x as i64, y as i64, 8), 1);
        let (x, y) = layout.block_to_pixel(11, 10);
        assert_eq!(decode_block_at(&image, x as i64, y as i64, 8), 0);
    }

    #[test]
    fn partially_visible_block_uses_visible_pixels() {
        let image = CarrierImage::filled(16, 16, WHITE);
        assert_eq!(decode_block_at(&image, -4, -4, 8), 1);
        assert_eq!(decode_block_at(&image, 12, 12, 8), 1);
    }

    #[test]
    fn block_outside_image_reads_zero() {
        let image = CarrierImage::filled(16, 16, WHITE);
        assert_eq!(decode_block_at(&image, 16, 0, 8), 0);
        assert_eq!(decode_block_at(&image, -8, 0, 8), 0);
    }
}
