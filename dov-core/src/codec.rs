//! Frame codec: logical frames to carrier images and back.
//!
//! Encoding paints a base image (grey frame, darker content area, four
//! corner markers), then the 80 header bits, then the payload bits.
//! Decoding reads the same blocks at a caller-supplied offset; locating
//! that offset is the detector's and the analyzer's job.

use tracing::trace;

use crate::block::{BLACK, WHITE, bits_to_bytes, bytes_to_bits, decode_block_at, encode_block};
use crate::detector::Offset;
use crate::error::DovError;
use crate::header::{FrameHeader, FrameType, HEADER_SIZE};
use crate::image::CarrierImage;
use crate::layout::{CRC_SIZE, Layout};
use crate::payload::{EofPayload, LogicalFrame, StartPayload};

/// Background outside the content area.
pub const FRAME_GREY: [u8; 3] = [0x80, 0x80, 0x80];
/// Background of the content area.
pub const CONTENT_GREY: [u8; 3] = [0x60, 0x60, 0x60];

#[derive(Debug, Clone)]
pub struct FrameCodec {
    layout: Layout,
}

impl FrameCodec {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Chunk bytes one DATA frame can carry.
    pub fn payload_capacity(&self) -> usize {
        self.layout.payload_capacity()
    }

    // ── Encoding ─────────────────────────────────────────────────

    /// Empty frame with markers only.
    pub fn base_image(&self) -> CarrierImage {
        let l = &self.layout;
        let mut image = CarrierImage::filled(l.frame_width(), l.frame_height(), FRAME_GREY);
        image.fill_rect(
            l.safe_margin() as i64,
            l.safe_margin() as i64,
            l.content_width(),
            l.content_height(),
            CONTENT_GREY,
        );
        let size = l.corner_size();
        for corner in l.corners() {
            let colour = if corner.dark { BLACK } else { WHITE };
            image.fill_rect(corner.x as i64, corner.y as i64, size, size, colour);
        }
        image
    }

    pub fn encode_idle(&self) -> CarrierImage {
        self.render(FrameHeader::new(FrameType::Idle, 0, 0), &[])
    }

    pub fn encode_start(&self, start: &StartPayload) -> Result<CarrierImage, DovError> {
        let payload = start.to_bytes()?;
        let header = self.header_for(FrameType::Start, 0, payload.len(), self.layout.data_bytes())?;
        Ok(self.render(header, &payload))
    }

    /// DATA frame: the chunk followed by its big-endian CRC-32.
    pub fn encode_data(&self, index: u32, chunk: &[u8]) -> Result<CarrierImage, DovError> {
        let header = self.header_for(FrameType::Data, index, chunk.len(), self.payload_capacity())?;
        let mut payload = Vec::with_capacity(chunk.len() + CRC_SIZE);
        payload.extend_from_slice(chunk);
        payload.extend_from_slice(&crc32fast::hash(chunk).to_be_bytes());
        Ok(self.render(header, &payload))
    }

    pub fn encode_eof(&self, eof: &EofPayload) -> Result<CarrierImage, DovError> {
        let payload = eof.to_bytes();
        let header = self.header_for(FrameType::Eof, 0, payload.len(), self.layout.data_bytes())?;
        Ok(self.render(header, &payload))
    }

    pub fn encode(&self, frame: &LogicalFrame) -> Result<CarrierImage, DovError> {
        match frame {
            LogicalFrame::Idle => Ok(self.encode_idle()),
            LogicalFrame::Start(start) => self.encode_start(start),
            LogicalFrame::Data { index, chunk } => self.encode_data(*index, chunk),
            LogicalFrame::Eof(eof) => self.encode_eof(eof),
        }
    }

    fn header_for(
        &self,
        frame_type: FrameType,
        index: u32,
        len: usize,
        max: usize,
    ) -> Result<FrameHeader, DovError> {
        let max = max.min(u16::MAX as usize);
        if len > max {
            return Err(DovError::PayloadTooLarge { size: len, max });
        }
        Ok(FrameHeader::new(frame_type, index, len as u16))
    }

    fn render(&self, header: FrameHeader, payload: &[u8]) -> CarrierImage {
        let mut image = self.base_image();

        for (i, bit) in bytes_to_bits(&header.to_bytes()).into_iter().enumerate() {
            let (bx, by) = self.layout.header_bit_to_block(i);
            encode_block(&mut image, &self.layout, bx, by, bit);
        }

        let limit = self.layout.data_blocks();
        for (i, bit) in bytes_to_bits(payload).into_iter().enumerate().take(limit) {
            let (bx, by) = self.layout.data_bit_to_block(i);
            encode_block(&mut image, &self.layout, bx, by, bit);
        }
        image
    }

    // ── Decoding ─────────────────────────────────────────────────

    /// Read and validate the header at `offset`.
    pub fn decode_header(&self, image: &CarrierImage, offset: Offset) -> Option<FrameHeader> {
        let bits: Vec<u8> = (0..HEADER_SIZE * 8)
            .map(|i| {
                let (bx, by) = self.layout.header_bit_to_block(i);
                self.read_block(image, bx, by, offset)
            })
            .collect();
        let bytes = bits_to_bytes(&bits).ok()?;
        let header = FrameHeader::from_bytes(&bytes)?;

        let len = header.data_length as usize;
        if len > self.layout.data_bytes() {
            trace!(len, "header length exceeds data area");
            return None;
        }
        if header.frame_type == FrameType::Data && len > self.payload_capacity() {
            trace!(len, "DATA length exceeds payload capacity");
            return None;
        }
        Some(header)
    }

    /// Read `len` raw payload bytes at `offset`.
    pub fn decode_data(&self, image: &CarrierImage, offset: Offset, len: usize) -> Option<Vec<u8>> {
        if len == 0 || len > self.layout.data_bytes() {
            return None;
        }
        let bits: Vec<u8> = (0..len * 8)
            .map(|i| {
                let (bx, by) = self.layout.data_bit_to_block(i);
                self.read_block(image, bx, by, offset)
            })
            .collect();
        bits_to_bytes(&bits).ok()
    }

    /// Read a `len`-byte chunk plus its CRC-32; `None` on mismatch.
    pub fn decode_data_with_crc(
        &self,
        image: &CarrierImage,
        offset: Offset,
        len: usize,
    ) -> Option<Vec<u8>> {
        let mut bytes = self.decode_data(image, offset, len + CRC_SIZE)?;
        let crc = bytes.split_off(len);
        let expected = u32::from_be_bytes([crc[0], crc[1], crc[2], crc[3]]);
        if crc32fast::hash(&bytes) != expected {
            trace!(len, "DATA CRC mismatch");
            return None;
        }
        Some(bytes)
    }

    fn read_block(&self, image: &CarrierImage, bx: u32, by: u32, offset: Offset) -> u8 {
        let (px, py) = self.layout.block_to_pixel(bx, by);
        decode_block_at(
            image,
            px as i64 + offset.x as i64,
            py as i64 + offset.y as i64,
            self.layout.block_size(),
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────
