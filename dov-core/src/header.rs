//! Fixed 10-byte frame header.
//!
//! ```text
//! 0      2       3              7             9          10
//! ┌──────┬───────┬──────────────┬─────────────┬──────────┐
//! │ "DV" │ type  │ index u32 BE │ len u16 BE  │ reserved │
//! └──────┴───────┴──────────────┴─────────────┴──────────┘
//! ```

use bytes::{Buf, BufMut};

/// Serialized header length in bytes.
pub const HEADER_SIZE: usize = 10;

/// Header magic, ASCII `"DV"`.
pub const MAGIC: [u8; 2] = [0x44, 0x56];

// ── FrameType ────────────────────────────────────────────────────

/// Wire code for the four logical frame kinds.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Idle = 0x00,
    Start = 0x01,
    Data = 0x02,
    Eof = 0x03,
}

impl TryFrom<u8> for FrameType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(FrameType::Idle),
            0x01 => Ok(FrameType::Start),
            0x02 => Ok(FrameType::Data),
            0x03 => Ok(FrameType::Eof),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FrameType::Idle => "IDLE",
            FrameType::Start => "START",
            FrameType::Data => "DATA",
            FrameType::Eof => "EOF",
        };
        f.write_str(name)
    }
}

// ── FrameHeader ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    /// Chunk index for DATA, zero otherwise.
    pub frame_index: u32,
    /// Payload bytes following the header, excluding any CRC.
    pub data_length: u16,
}

impl FrameHeader {
    pub fn new(frame_type: FrameType, frame_index: u32, data_length: u16) -> Self {
        Self {
            frame_type,
            frame_index,
            data_length,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_slice(&MAGIC);
        buf.put_u8(self.frame_type as u8);
        buf.put_u32(self.frame_index);
        buf.put_u16(self.data_length);
        buf.put_u8(0);
        out
    }

    /// Parse a header. `None` for short input, bad magic or an unknown
    /// type code; the reserved byte is ignored.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        let mut buf = &bytes[..HEADER_SIZE];
        if buf[..2] != MAGIC {
            return None;
        }
        buf.advance(2);
        let frame_type = FrameType::try_from(buf.get_u8()).ok()?;
        let frame_index = buf.get_u32();
        let data_length = buf.get_u16();
        Some(Self {
            frame_type,
            frame_index,
            data_length,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
