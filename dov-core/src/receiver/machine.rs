//! Receiver state machine.
//!
//! Owned by the analyzer worker. Time is passed in by the caller, so the
//! machine itself never reads a clock.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::assembler::{AssemblyOutcome, AssemblyReport};
use super::{ReceiverConfig, ReceiverState};
use crate::event::{ReceiverEvent, ReceiverEventTx, emit};
use crate::header::{FrameHeader, FrameType};
use crate::payload::{EofPayload, LogicalFrame, StartPayload};

// ── ReceptionSession ─────────────────────────────────────────────

/// Chunks collected for one announced transfer. Storage grows with the
/// chunks actually received, never with the announced frame count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceptionSession {
    start: StartPayload,
    chunks: HashMap<u32, Vec<u8>>,
}

impl ReceptionSession {
    pub fn new(start: StartPayload) -> Self {
        Self {
            chunks: HashMap::new(),
            start,
        }
    }

    pub fn start(&self) -> &StartPayload {
        &self.start
    }

    pub fn total_frames(&self) -> u32 {
        self.start.total_frames
    }

    pub fn received_count(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// Whether `index` is a chunk this session still needs.
    pub fn needs(&self, index: u32) -> bool {
        index < self.start.total_frames && !self.chunks.contains_key(&index)
    }

    /// Store a chunk. Out-of-range and already-stored indices are
    /// ignored; returns whether the chunk was new.
    pub fn insert(&mut self, index: u32, chunk: Vec<u8>) -> bool {
        if !self.needs(index) {
            return false;
        }
        self.chunks.insert(index, chunk);
        true
    }

    pub fn missing(&self) -> Vec<u32> {
        (0..self.start.total_frames)
            .filter(|i| !self.chunks.contains_key(i))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.len() as u64 == u64::from(self.start.total_frames)
    }

    pub fn chunks(&self) -> &HashMap<u32, Vec<u8>> {
        &self.chunks
    }
}

/// Work handed to the assembler when an EOF closes a session.
#[derive(Debug)]
pub struct AssemblyJob {
    pub generation: u64,
    pub session: ReceptionSession,
}

// ── ReceiverMachine ──────────────────────────────────────────────

pub struct ReceiverMachine {
    config: ReceiverConfig,
    /// Payload bytes per DATA frame, when known from the layout.
    chunk_size: Option<u64>,
    state: ReceiverState,
    session: Option<ReceptionSession>,
    /// An incomplete session kept in `Error` so a resend can finish it.
    retained: Option<ReceptionSession>,
    /// Bumped whenever the current session is replaced or dropped.
    generation: u64,
    last_frame: Instant,
    last_valid: Instant,
    last_warning: Option<Instant>,
    events: ReceiverEventTx,
}

impl ReceiverMachine {
    pub fn new(config: ReceiverConfig, events: ReceiverEventTx) -> Self {
        let now = Instant::now();
        Self {
            config,
            chunk_size: None,
            state: ReceiverState::Stopped,
            session: None,
            retained: None,
            generation: 0,
            last_frame: now,
            last_valid: now,
            last_warning: None,
            events,
        }
    }

    /// Require START frames to announce exactly the frame count a sender
    /// chunking at `chunk_size` bytes would produce.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size as u64).filter(|size| *size > 0);
        self
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn session(&self) -> Option<&ReceptionSession> {
        self.session.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Capture began.
    pub fn start(&mut self, now: Instant) {
        self.last_valid = now;
        self.set_state(ReceiverState::Scanning, "scanning");
    }

    /// Capture ended; everything is dropped.
    pub fn stop(&mut self) {
        self.drop_sessions();
        self.set_state(ReceiverState::Stopped, "stopped");
    }

    /// A header decoded; the link is alive.
    pub fn mark_valid(&mut self, now: Instant) {
        self.last_valid = now;
    }

    /// Whether a frame with `header` would change anything, i.e. whether
    /// its payload is worth decoding. Duplicate DATA is filtered here.
    pub fn wants_payload(&self, header: &FrameHeader) -> bool {
        match header.frame_type {
            FrameType::Idle => self.state == ReceiverState::Scanning,
            FrameType::Start => self.state != ReceiverState::Stopped,
            FrameType::Data => {
                self.state == ReceiverState::Receiving
                    && self.session.as_ref().is_some_and(|s| s.needs(header.frame_index))
            }
            FrameType::Eof => self.state == ReceiverState::Receiving,
        }
    }

    /// Apply a decoded frame. Returns a job when an EOF closes the
    /// session and assembly should begin.
    pub fn on_frame(&mut self, frame: LogicalFrame, now: Instant) -> Option<AssemblyJob> {
        use ReceiverState as S;

        match (self.state, frame) {
            (S::Scanning, LogicalFrame::Idle) => {
                self.set_state(S::Connected, "connected, waiting for transfer");
            }
            (S::Scanning | S::Connected, LogicalFrame::Start(start)) => {
                self.begin_session(start, now);
            }
            (S::Receiving, LogicalFrame::Data { index, chunk }) => {
                self.store_chunk(index, chunk, now);
            }
            (S::Receiving, LogicalFrame::Start(start)) => {
                let same = self.session.as_ref().is_some_and(|s| s.start.same_session(&start));
                if same {
                    self.last_frame = now;
                } else {
                    self.begin_session(start, now);
                }
            }
            (S::Receiving, LogicalFrame::Eof(eof)) => return self.close_session(eof),
            (S::Error, LogicalFrame::Start(start))
                if self.retained.as_ref().is_some_and(|s| s.start.same_session(&start)) =>
            {
                self.resume_session(now);
            }
            (S::Assembling | S::Complete | S::Error, LogicalFrame::Start(start)) => {
                self.begin_session(start, now);
            }
            (state, frame) => {
                debug!(%state, kind = %frame.frame_type(), "frame ignored");
            }
        }
        None
    }

    /// Apply the assembler's verdict for the session it was given.
    pub fn on_assembly(&mut self, report: AssemblyReport) {
        if report.generation != self.generation || self.state != ReceiverState::Assembling {
            debug!(
                generation = report.generation,
                current = self.generation,
                "stale assembly result ignored"
            );
            return;
        }
        match report.outcome {
            AssemblyOutcome::Completed(path) => {
                info!(path = %path.display(), "file received");
                self.set_state(
                    ReceiverState::Complete,
                    format!("received {}", path.display()),
                );
                emit(&self.events, ReceiverEvent::Completed(path));
            }
            AssemblyOutcome::Incomplete { missing, session } => {
                warn!(missing = missing.len(), "transfer incomplete");
                self.set_state(
                    ReceiverState::Error,
                    format!("{} frames missing", missing.len()),
                );
                emit(&self.events, ReceiverEvent::MissingFrames(missing));
                self.retained = Some(session);
            }
            AssemblyOutcome::Failed(message) => {
                warn!("assembly failed: {message}");
                emit(&self.events, ReceiverEvent::Error(message.clone()));
                self.set_state(ReceiverState::Error, message);
            }
        }
    }

    /// Run once per analyzer iteration: warn on a stalled transfer and
    /// reset a dead link.
    pub fn check_timeouts(&mut self, now: Instant) {
        let frame_timeout = self.config.frame_timeout();
        if self.state == ReceiverState::Receiving
            && now.saturating_duration_since(self.last_frame) > frame_timeout
        {
            let due = self
                .last_warning
                .is_none_or(|last| now.saturating_duration_since(last) > frame_timeout);
            if due {
                self.last_warning = Some(now);
                warn!("no new frames for {}s", frame_timeout.as_secs());
                emit(
                    &self.events,
                    ReceiverEvent::Warning("receive timed out, still waiting".into()),
                );
            }
        }

        if self.state != ReceiverState::Stopped
            && now.saturating_duration_since(self.last_valid) > self.config.connection_timeout()
        {
            warn!("connection timed out, rescanning");
            self.drop_sessions();
            emit(&self.events, ReceiverEvent::Progress { received: 0, total: 0 });
            self.set_state(ReceiverState::Scanning, "connection timed out, rescanning");
            self.last_valid = now;
        }
    }

    // ── Internals ────────────────────────────────────────────────

    fn begin_session(&mut self, start: StartPayload, now: Instant) {
        if !plausible(&start, self.chunk_size) {
            debug!(
                size = start.file_size,
                frames = start.total_frames,
                "implausible START ignored"
            );
            return;
        }
        info!(
            name = %start.name,
            size = start.file_size,
            frames = start.total_frames,
            sha256 = %hex::encode(start.sha256),
            "transfer announced"
        );
        self.generation += 1;
        self.retained = None;
        self.last_frame = now;
        self.last_warning = None;

        let (name, total) = (start.name.clone(), start.total_frames);
        emit(
            &self.events,
            ReceiverEvent::FileInfo {
                name: name.clone(),
                size: start.file_size,
                total_frames: total,
            },
        );
        emit(&self.events, ReceiverEvent::Progress { received: 0, total });
        self.session = Some(ReceptionSession::new(start));
        self.set_state(ReceiverState::Receiving, format!("receiving {name}"));
    }

    fn resume_session(&mut self, now: Instant) {
        let Some(session) = self.retained.take() else {
            return;
        };
        info!(
            name = %session.start.name,
            missing = session.total_frames() - session.received_count(),
            "resuming incomplete transfer"
        );
        self.generation += 1;
        self.last_frame = now;
        self.last_warning = None;

        let start = &session.start;
        emit(
            &self.events,
            ReceiverEvent::FileInfo {
                name: start.name.clone(),
                size: start.file_size,
                total_frames: start.total_frames,
            },
        );
        emit(
            &self.events,
            ReceiverEvent::Progress {
                received: session.received_count(),
                total: session.total_frames(),
            },
        );
        let message = format!("resuming {}", start.name);
        self.session = Some(session);
        self.set_state(ReceiverState::Receiving, message);
    }

    fn store_chunk(&mut self, index: u32, chunk: Vec<u8>, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.insert(index, chunk) {
            return;
        }
        self.last_frame = now;
        emit(
            &self.events,
            ReceiverEvent::Progress {
                received: session.received_count(),
                total: session.total_frames(),
            },
        );
    }

    fn close_session(&mut self, eof: EofPayload) -> Option<AssemblyJob> {
        let session = self.session.take()?;
        if eof.total_frames != session.total_frames() {
            let message = format!(
                "EOF frame count mismatch: {} != {}",
                eof.total_frames,
                session.total_frames()
            );
            warn!("{message}");
            emit(&self.events, ReceiverEvent::Warning(message));
        }
        if eof.sha256 != session.start.sha256 {
            warn!("EOF SHA-256 mismatch");
            emit(&self.events, ReceiverEvent::Warning("EOF SHA-256 mismatch".into()));
        }
        self.set_state(ReceiverState::Assembling, "assembling file");
        Some(AssemblyJob {
            generation: self.generation,
            session,
        })
    }

    fn drop_sessions(&mut self) {
        self.session = None;
        self.retained = None;
        self.generation += 1;
    }

    fn set_state(&mut self, state: ReceiverState, message: impl Into<String>) {
        let message = message.into();
        if self.state != state {
            debug!(from = %self.state, to = %state, "receiver state");
        }
        self.state = state;
        emit(&self.events, ReceiverEvent::StateChanged { state, message });
    }
}

/// Every chunk carries between 1 and 65535 bytes, and all but the last
/// carry exactly `chunk_size`. A START that disagrees was misread.
fn plausible(start: &StartPayload, chunk_size: Option<u64>) -> bool {
    let frames = u64::from(start.total_frames);
    let in_range = frames <= start.file_size
        && start.file_size <= frames.saturating_mul(u64::from(u16::MAX));
    in_range && chunk_size.is_none_or(|size| start.file_size.div_ceil(size) == frames)
}

// ── Tests ────────────────────────────────────────────────────────
