//! Typed payloads for the four logical frame kinds.
//!
//! ```text
//! START  name_len u8 | name | file_size u64 | total_frames u32 | sha256[32] | flags u32
//! DATA   chunk | crc32(chunk) u32            (CRC handled by the frame codec)
//! EOF    total_frames u32 | sha256[32]
//! ```
//!
//! All integers are big-endian.

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::error::DovError;
use crate::header::FrameType;

/// Longest file name the one-byte length prefix can carry.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// START payload size without the name and the optional flags word.
const START_BASE_LEN: usize = 1 + 8 + 4 + 32;

/// EOF payload size.
pub const EOF_PAYLOAD_LEN: usize = 4 + 32;

bitflags! {
    /// Per-transfer options carried in the START payload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TransferFlags: u32 {
        /// The transferred file is an archive to extract as a directory.
        const DIRECTORY = 0x0000_0001;
    }
}

// ── START ────────────────────────────────────────────────────────

/// Transfer announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPayload {
    pub name: String,
    pub file_size: u64,
    pub total_frames: u32,
    pub sha256: [u8; 32],
    pub flags: TransferFlags,
}

impl StartPayload {
    pub fn is_directory(&self) -> bool {
        self.flags.contains(TransferFlags::DIRECTORY)
    }

    /// Whether `other` announces the same transfer.
    pub fn same_session(&self, other: &StartPayload) -> bool {
        self.name == other.name
            && self.file_size == other.file_size
            && self.total_frames == other.total_frames
            && self.sha256 == other.sha256
            && self.flags == other.flags
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DovError> {
        let name = self.name.as_bytes();
        if name.len() > MAX_NAME_LEN {
            return Err(DovError::NameTooLong {
                len: name.len(),
                max: MAX_NAME_LEN,
            });
        }
        let mut buf = Vec::with_capacity(START_BASE_LEN + name.len() + 4);
        buf.put_u8(name.len() as u8);
        buf.put_slice(name);
        buf.put_u64(self.file_size);
        buf.put_u32(self.total_frames);
        buf.put_slice(&self.sha256);
        buf.put_u32(self.flags.bits());
        Ok(buf)
    }

    /// Parse a START payload. A payload that ends right after the hash
    /// has no flags word and parses with empty flags.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut buf = bytes;
        if buf.remaining() < START_BASE_LEN {
            return None;
        }
        let name_len = buf.get_u8() as usize;
        if buf.remaining() < name_len + START_BASE_LEN - 1 {
            return None;
        }
        let name = String::from_utf8_lossy(&buf[..name_len]).into_owned();
        buf.advance(name_len);
        let file_size = buf.get_u64();
        let total_frames = buf.get_u32();
        let mut sha256 = [0u8; 32];
        buf.copy_to_slice(&mut sha256);
        let flags = if buf.remaining() >= 4 {
            TransferFlags::from_bits_retain(buf.get_u32())
        } else {
            TransferFlags::empty()
        };
        Some(Self {
            name,
            file_size,
            total_frames,
            sha256,
            flags,
        })
    }
}

// ── EOF ──────────────────────────────────────────────────────────

/// End-of-transfer marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EofPayload {
    pub total_frames: u32,
    pub sha256: [u8; 32],
}

impl EofPayload {
    /// Whether this EOF agrees with the announced transfer.
    pub fn matches(&self, start: &StartPayload) -> bool {
        self.total_frames == start.total_frames && self.sha256 == start.sha256
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(EOF_PAYLOAD_LEN);
        buf.put_u32(self.total_frames);
        buf.put_slice(&self.sha256);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut buf = bytes;
        if buf.remaining() < EOF_PAYLOAD_LEN {
            return None;
        }
        let total_frames = buf.get_u32();
        let mut sha256 = [0u8; 32];
        buf.copy_to_slice(&mut sha256);
        Some(Self {
            total_frames,
            sha256,
        })
    }
}

// ── LogicalFrame ─────────────────────────────────────────────────

/// A decoded (or to-be-encoded) frame with its typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalFrame {
    Idle,
    Start(StartPayload),
    Data { index: u32, chunk: Vec<u8> },
    Eof(EofPayload),
}

impl LogicalFrame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            LogicalFrame::Idle => FrameType::Idle,
            LogicalFrame::Start(_) => FrameType::Start,
            LogicalFrame::Data { .. } => FrameType::Data,
            LogicalFrame::Eof(_) => FrameType::Eof,
        }
    }

    /// Build a typed frame from a header type and its decoded payload.
    /// DATA payloads are expected to be CRC-checked already.
    pub fn from_parts(frame_type: FrameType, index: u32, payload: Vec<u8>) -> Option<Self> {
        match frame_type {
            FrameType::Idle => Some(LogicalFrame::Idle),
            FrameType::Start => StartPayload::from_bytes(&payload).map(LogicalFrame::Start),
            FrameType::Data => Some(LogicalFrame::Data {
                index,
                chunk: payload,
            }),
            FrameType::Eof => EofPayload::from_bytes(&payload).map(LogicalFrame::Eof),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_start() -> StartPayload {
        StartPayload {
            name: "report.pdf".into(),
            file_size: 10_000,
            total_frames: 3,
            sha256: [0xAB; 32],
            flags: TransferFlags::empty(),
        }
    }

    #[test]
    fn start_round_trip() {
        let start = sample_start();
        let bytes = start.to_bytes().unwrap();
        assert_eq!(bytes.len(), START_BASE_LEN + 10 + 4);
        assert_eq!(StartPayload::from_bytes(&bytes), Some(start));
    }

    #[test]
    fn start_without_flags_word() {
        let mut start = sample_start();
        start.flags = TransferFlags::DIRECTORY;
        let mut bytes = start.to_bytes().unwrap();
        bytes.truncate(bytes.len() - 4);
        let parsed = StartPayload::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.flags, TransferFlags::empty());
        assert_eq!(parsed.name, "report.pdf");
    }

    #[test]
    fn start_rejects_truncated_name() {
        let bytes = sample_start().to_bytes().unwrap();
        assert_eq!(StartPayload::from_bytes(&bytes[..20]), None);
    }

    #[test]
    fn start_rejects_long_name() {
        let mut start = sample_start();
        start.name = "x".repeat(300);
        assert!(matches!(
            start.to_bytes(),
            Err(DovError::NameTooLong { len: 300, max: 255 })
        ));
    }

    #[test]
    fn directory_flag() {
        let mut start = sample_start();
        assert!(!start.is_directory());
        start.flags |= TransferFlags::DIRECTORY;
        let parsed = StartPayload::from_bytes(&start.to_bytes().unwrap()).unwrap();
        assert!(parsed.is_directory());
    }

    #[test]
    fn eof_round_trip_and_match() {
        let start = sample_start();
        let eof = EofPayload {
            total_frames: 3,
            sha256: [0xAB; 32],
        };
        let bytes = eof.to_bytes();
        assert_eq!(bytes.len(), EOF_PAYLOAD_LEN);
        assert_eq!(EofPayload::from_bytes(&bytes), Some(eof));
        assert!(eof.matches(&start));

        let other = EofPayload {
            total_frames: 4,
            ..eof
        };
        assert!(!other.matches(&start));
    }

    #[test]
    fn same_session_compares_every_field() {
        let a = sample_start();
        let mut b = a.clone();
        assert!(a.same_session(&b));
        b.flags = TransferFlags::DIRECTORY;
        assert!(!a.same_session(&b));
    }
}
