//! Receiver controller.
//!
//! ```text
//!  CaptureSource ──► capture ──► ImageQueue ──► analyzer ──► assembler
//!                     worker     (drop-oldest)   worker        worker
//!                       │                          ▲              │
//!                       └─ Preview events          └── outcomes ──┘
//! ```
//!
//! The analyzer worker owns the [`ReceiverMachine`] and is the only
//! thread that changes receiver state. The assembler reports back over a
//! channel.

mod assembler;
mod machine;
mod pipeline;
mod queue;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use assembler::{AssemblyOutcome, AssemblyReport, assemble};
pub use machine::{AssemblyJob, ReceiverMachine, ReceptionSession};
pub use pipeline::{Receiver, ReceiverHandle};
pub use queue::ImageQueue;

// ── ReceiverConfig ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Warn when no new chunk arrives for this long while receiving.
    pub frame_timeout_ms: u64,
    /// Drop the session and rescan after this long without a header.
    pub connection_timeout_ms: u64,
    /// Captures buffered between the capture and analyzer workers.
    pub queue_capacity: usize,
    /// How long the analyzer waits for a capture before checking timeouts.
    pub poll_interval_ms: u64,
    /// Capture device to open.
    pub device_id: u32,
    /// Where received files are written.
    pub save_dir: PathBuf,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            frame_timeout_ms: 10_000,
            connection_timeout_ms: 60_000,
            queue_capacity: 10,
            poll_interval_ms: 200,
            device_id: 0,
            save_dir: PathBuf::from("received"),
        }
    }
}

impl ReceiverConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ── ReceiverState ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiverState {
    Stopped,
    /// Capturing, no frame seen yet.
    Scanning,
    /// IDLE frames seen, waiting for a transfer.
    Connected,
    Receiving,
    Assembling,
    Complete,
    Error,
}

impl std::fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReceiverState::Stopped => "stopped",
            ReceiverState::Scanning => "scanning",
            ReceiverState::Connected => "connected",
            ReceiverState::Receiving => "receiving",
            ReceiverState::Assembling => "assembling",
            ReceiverState::Complete => "complete",
            ReceiverState::Error => "error",
        };
        f.write_str(name)
    }
}
