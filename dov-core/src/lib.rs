//! # dov-core
//!
//! Core library for a one-way optical data link: a file is painted onto a
//! sequence of carrier images, shown on a screen, captured by a camera and
//! reassembled on the other side.
//!
//! This crate contains:
//! - **Geometry**: `Layout` maps header and data bits to blocks and pixels
//! - **Wire format**: `FrameHeader`, `StartPayload`, `EofPayload`, `LogicalFrame`
//! - **Codec**: `FrameCodec` renders and reads carrier images, CRC-32 on DATA
//! - **Detection**: `FrameDetector` finds the corner markers, `FrameAnalyzer`
//!   combines detection, an offset cache and retries
//! - **Sender**: `SenderMachine` and the tokio `Sender` loop that paces frames
//! - **Receiver**: `ReceiverMachine` and the three-thread `Receiver` pipeline
//! - **Collaborators**: `CaptureSource`, `DisplaySink`, `Archiver`, `FileStore`
//! - **Error**: `DovError`, a `thiserror`-based error enum

pub mod analyzer;
pub mod block;
pub mod codec;
pub mod detector;
pub mod error;
pub mod event;
pub mod file;
pub mod header;
pub mod image;
pub mod io;
pub mod layout;
pub mod payload;
pub mod receiver;
pub mod sender;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use analyzer::{AnalyzerConfig, FrameAnalyzer, HeaderMatch};
pub use codec::FrameCodec;
pub use detector::{DetectorConfig, FrameDetector, Offset};
pub use error::DovError;
pub use event::{ReceiverEvent, SenderEvent};
pub use file::{PreparedFile, chunk_file};
pub use header::{FrameHeader, FrameType, HEADER_SIZE};
pub use image::{CarrierImage, PixelFormat};
pub use io::{Archiver, CaptureSource, DisplaySink, FileStore, LocalFileStore};
pub use layout::{Layout, LayoutConfig};
pub use payload::{EofPayload, LogicalFrame, StartPayload, TransferFlags};
pub use receiver::{
    ImageQueue, Receiver, ReceiverConfig, ReceiverHandle, ReceiverMachine, ReceiverState,
};
pub use sender::{Sender, SenderCommand, SenderConfig, SenderHandle, SenderMachine, SenderState};
