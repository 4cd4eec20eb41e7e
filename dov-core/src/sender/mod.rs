//! Sender controller.
//!
//! [`SenderMachine`] decides which carrier image goes on screen at each
//! tick; [`Sender`] drives it from a single tokio task and paints the
//! result on a [`DisplaySink`](crate::io::DisplaySink).

mod machine;
mod service;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use machine::{Emission, SenderMachine, TransferSession};
pub use service::{Sender, SenderCommand, SenderHandle};

// ── SenderConfig ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Ticks the START frame stays on screen.
    pub start_repeat: u32,
    /// Ticks each DATA frame stays on screen.
    pub data_repeat: u32,
    /// Ticks the EOF frame stays on screen.
    pub eof_repeat: u32,
    /// Trailing chunks that get the longer `tail_repeat` in a full pass.
    pub tail_frames: u32,
    pub tail_repeat: u32,
    /// Tick rate while sending.
    pub target_fps: u32,
    /// Tick period while idle, in milliseconds.
    pub idle_interval_ms: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            start_repeat: 5,
            data_repeat: 1,
            eof_repeat: 5,
            tail_frames: 5,
            tail_repeat: 3,
            target_fps: 20,
            idle_interval_ms: 200,
        }
    }
}

impl SenderConfig {
    /// Tick period while sending.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / self.target_fps.max(1) as u64)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms.max(1))
    }
}

// ── SenderState ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SenderState {
    Idle,
    Preparing,
    Ready,
    SendingStart,
    SendingData,
    SendingEof,
    /// A pass finished; the session is kept for resends.
    ReadyResend,
}

impl SenderState {
    pub fn is_sending(self) -> bool {
        matches!(
            self,
            SenderState::SendingStart | SenderState::SendingData | SenderState::SendingEof
        )
    }
}

impl std::fmt::Display for SenderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SenderState::Idle => "idle",
            SenderState::Preparing => "preparing",
            SenderState::Ready => "ready",
            SenderState::SendingStart => "sending START",
            SenderState::SendingData => "sending DATA",
            SenderState::SendingEof => "sending EOF",
            SenderState::ReadyResend => "ready for resend",
        };
        f.write_str(name)
    }
}
