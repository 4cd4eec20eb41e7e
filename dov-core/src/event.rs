//! Outbound notifications from the sender and receiver controllers.
//!
//! Both controllers publish on unbounded `tokio::sync::mpsc` channels so
//! the front-end sees events in the order they happened.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::image::CarrierImage;
use crate::receiver::ReceiverState;
use crate::sender::SenderState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderEvent {
    StateChanged(SenderState),
    PrepareProgress { message: String, percent: u8 },
    /// A selection finished preparing and is ready to send.
    Prepared {
        name: String,
        size: u64,
        total_frames: u32,
    },
    Progress {
        status: String,
        percent: u8,
        current: u32,
        total: u32,
        /// Chunk index on screen, for DATA frames.
        index: Option<u32>,
    },
    /// The EOF burst finished. `resend` tells a resend pass from a full one.
    Completed { resend: bool },
    Error(String),
}

#[derive(Debug, Clone)]
pub enum ReceiverEvent {
    StateChanged {
        state: ReceiverState,
        message: String,
    },
    /// A new transfer was announced.
    FileInfo {
        name: String,
        size: u64,
        total_frames: u32,
    },
    Progress { received: u32, total: u32 },
    AssemblyProgress { written: u32, total: u32 },
    /// The latest capture, before analysis.
    Preview(Arc<CarrierImage>),
    /// Indices still missing when EOF arrived.
    MissingFrames(Vec<u32>),
    Completed(PathBuf),
    Warning(String),
    Error(String),
}

pub type SenderEventTx = mpsc::UnboundedSender<SenderEvent>;
pub type ReceiverEventTx = mpsc::UnboundedSender<ReceiverEvent>;

/// Send without caring whether anyone is still listening.
pub(crate) fn emit<T>(tx: &mpsc::UnboundedSender<T>, event: T) {
    let _ = tx.send(event);
}
