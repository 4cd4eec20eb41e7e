//! Tick-driven sender state machine.
//!
//! Pure logic: no clock, no images. Each [`tick`](SenderMachine::tick)
//! advances the repeat counters and says which frame to show; events are
//! queued in an outbox the service drains after every step.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, info};

use super::{SenderConfig, SenderState};
use crate::error::DovError;
use crate::event::SenderEvent;
use crate::file::PreparedFile;
use crate::payload::{EofPayload, StartPayload, TransferFlags};

/// A prepared file (or archived directory) held for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSession {
    pub file: PreparedFile,
    pub flags: TransferFlags,
}

impl TransferSession {
    pub fn total_frames(&self) -> u32 {
        self.file.total_frames()
    }

    pub fn start_payload(&self) -> StartPayload {
        StartPayload {
            name: self.file.name.clone(),
            file_size: self.file.size,
            total_frames: self.total_frames(),
            sha256: self.file.sha256,
            flags: self.flags,
        }
    }

    pub fn eof_payload(&self) -> EofPayload {
        EofPayload {
            total_frames: self.total_frames(),
            sha256: self.file.sha256,
        }
    }

    pub fn chunk(&self, index: u32) -> Option<&[u8]> {
        self.file.chunks.get(index as usize).map(Vec::as_slice)
    }
}

/// Which carrier image a tick puts on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Emission {
    Idle,
    Start,
    Data(u32),
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Full,
    Resend(Vec<u32>),
}

pub struct SenderMachine {
    config: SenderConfig,
    state: SenderState,
    session: Option<TransferSession>,
    mode: Mode,
    repeat: u32,
    /// Chunk index in a full pass, list position in a resend pass.
    position: u32,
    outbox: Vec<SenderEvent>,
}

impl SenderMachine {
    pub fn new(config: SenderConfig) -> Self {
        Self {
            config,
            state: SenderState::Idle,
            session: None,
            mode: Mode::Full,
            repeat: 0,
            position: 0,
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn session(&self) -> Option<&TransferSession> {
        self.session.as_ref()
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Tick period for the current state.
    pub fn interval(&self) -> Duration {
        if self.state.is_sending() {
            self.config.frame_interval()
        } else {
            self.config.idle_interval()
        }
    }

    /// Take the events queued since the last call.
    pub fn drain_events(&mut self) -> Vec<SenderEvent> {
        std::mem::take(&mut self.outbox)
    }

    // ── Commands ─────────────────────────────────────────────────

    /// A file or directory was selected; preparation may begin.
    pub fn begin_preparing(&mut self) -> Result<(), DovError> {
        if self.state != SenderState::Idle {
            return Err(DovError::InvalidState(format!(
                "cannot select a new transfer while {}",
                self.state
            )));
        }
        self.set_state(SenderState::Preparing);
        Ok(())
    }

    pub fn prepare_progress(&mut self, message: impl Into<String>, percent: u8) {
        if self.state == SenderState::Preparing {
            self.outbox.push(SenderEvent::PrepareProgress {
                message: message.into(),
                percent,
            });
        }
    }

    /// Preparation finished. Results arriving after the machine left
    /// `Preparing` are dropped; returns whether the session was taken.
    pub fn prepared(&mut self, session: TransferSession) -> bool {
        if self.state != SenderState::Preparing {
            debug!("dropping preparation result, state is {}", self.state);
            return false;
        }
        info!(
            name = %session.file.name,
            size = session.file.size,
            frames = session.total_frames(),
            "transfer ready"
        );
        self.outbox.push(SenderEvent::Prepared {
            name: session.file.name.clone(),
            size: session.file.size,
            total_frames: session.total_frames(),
        });
        self.session = Some(session);
        self.set_state(SenderState::Ready);
        true
    }

    pub fn prepare_failed(&mut self) {
        if self.state == SenderState::Preparing {
            self.set_state(SenderState::Idle);
        }
    }

    /// Start a full pass over every chunk.
    pub fn begin_sending(&mut self) -> Result<(), DovError> {
        self.ensure_ready()?;
        self.start_pass(Mode::Full);
        Ok(())
    }

    /// Start a pass over `indices` only. Out-of-range and repeated
    /// indices are dropped; nothing changes if none survive.
    pub fn begin_resend(&mut self, indices: &[u32]) -> Result<(), DovError> {
        let total = self.ensure_ready()?;
        if indices.is_empty() {
            return Err(DovError::InvalidResend("no frame indices given"));
        }
        let mut seen = HashSet::new();
        let valid: Vec<u32> = indices
            .iter()
            .copied()
            .filter(|&i| i < total && seen.insert(i))
            .collect();
        if valid.is_empty() {
            return Err(DovError::InvalidResend("no valid frame indices"));
        }
        info!(count = valid.len(), "resending frames");
        self.start_pass(Mode::Resend(valid));
        Ok(())
    }

    /// Drop the session and go back to `Idle`. Ignored while idle or
    /// preparing; returns whether anything changed.
    pub fn cancel(&mut self) -> bool {
        if matches!(self.state, SenderState::Idle | SenderState::Preparing) {
            return false;
        }
        self.session = None;
        self.mode = Mode::Full;
        self.repeat = 0;
        self.position = 0;
        self.set_state(SenderState::Idle);
        true
    }

    fn ensure_ready(&self) -> Result<u32, DovError> {
        match (&self.session, self.state) {
            (Some(session), SenderState::Ready | SenderState::ReadyResend) => {
                Ok(session.total_frames())
            }
            _ => Err(DovError::InvalidState(format!(
                "cannot send while {}",
                self.state
            ))),
        }
    }

    fn start_pass(&mut self, mode: Mode) {
        self.mode = mode;
        self.repeat = 0;
        self.position = 0;
        self.set_state(SenderState::SendingStart);
    }

    // ── Tick ─────────────────────────────────────────────────────

    /// Advance one tick and return the frame to show.
    pub fn tick(&mut self) -> Emission {
        match self.state {
            SenderState::Idle
            | SenderState::Preparing
            | SenderState::Ready
            | SenderState::ReadyResend => Emission::Idle,
            SenderState::SendingStart => self.tick_start(),
            SenderState::SendingData => self.tick_data(),
            SenderState::SendingEof => self.tick_eof(),
        }
    }

    fn tick_start(&mut self) -> Emission {
        let target = self.config.start_repeat.max(1);
        self.repeat += 1;
        let pass_len = self.pass_len();
        self.progress(
            format!("sending START {}/{target}", self.repeat),
            0,
            0,
            pass_len,
            None,
        );
        if self.repeat >= target {
            self.repeat = 0;
            self.position = 0;
            if pass_len == 0 {
                self.set_state(SenderState::SendingEof);
            } else {
                self.set_state(SenderState::SendingData);
            }
        }
        Emission::Start
    }

    fn tick_data(&mut self) -> Emission {
        let pass_len = self.pass_len();
        let (index, target) = match &self.mode {
            Mode::Full => {
                let remaining = pass_len.saturating_sub(self.position);
                let mut target = self.config.data_repeat.max(1);
                if self.config.tail_frames > 0 && remaining <= self.config.tail_frames {
                    target = target.max(self.config.tail_repeat);
                }
                (Some(self.position), target)
            }
            Mode::Resend(list) => (
                list.get(self.position as usize).copied(),
                self.config.data_repeat.max(1),
            ),
        };
        let Some(index) = index.filter(|_| self.position < pass_len) else {
            self.repeat = 0;
            self.set_state(SenderState::SendingEof);
            return self.tick_eof();
        };

        self.repeat += 1;
        let current = self.position + 1;
        let percent = (current as u64 * 100 / pass_len.max(1) as u64) as u8;
        let status = match self.mode {
            Mode::Full => format!(
                "sending DATA {current}/{pass_len} (repeat {}/{target})",
                self.repeat
            ),
            Mode::Resend(_) => format!(
                "resending DATA {current}/{pass_len} (frame {index}, repeat {}/{target})",
                self.repeat
            ),
        };
        self.progress(status, percent, current, pass_len, Some(index));

        if self.repeat >= target {
            self.repeat = 0;
            self.position += 1;
            if self.position >= pass_len {
                self.set_state(SenderState::SendingEof);
            }
        }
        Emission::Data(index)
    }

    fn tick_eof(&mut self) -> Emission {
        let target = self.config.eof_repeat.max(1);
        self.repeat += 1;
        let pass_len = self.pass_len();
        self.progress(
            format!("sending EOF {}/{target}", self.repeat),
            100,
            pass_len,
            pass_len,
            None,
        );
        if self.repeat >= target {
            let resend = matches!(self.mode, Mode::Resend(_));
            self.repeat = 0;
            self.position = 0;
            self.mode = Mode::Full;
            info!(resend, "transfer pass complete");
            self.outbox.push(SenderEvent::Completed { resend });
            self.set_state(SenderState::ReadyResend);
        }
        Emission::Eof
    }

    /// Frames visited by the current pass.
    fn pass_len(&self) -> u32 {
        match &self.mode {
            Mode::Full => self.session.as_ref().map_or(0, TransferSession::total_frames),
            Mode::Resend(list) => list.len() as u32,
        }
    }

    fn progress(&mut self, status: String, percent: u8, current: u32, total: u32, index: Option<u32>) {
        self.outbox.push(SenderEvent::Progress {
            status,
            percent,
            current,
            total,
            index,
        });
    }

    fn set_state(&mut self, state: SenderState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "sender state");
        }
        self.state = state;
        self.outbox.push(SenderEvent::StateChanged(state));
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn session(frames: usize) -> TransferSession {
        TransferSession {
            file: PreparedFile {
                name: "f.bin".into(),
                size: frames as u64 * 4,
                chunks: (0..frames).map(|i| vec![i as u8; 4]).collect(),
                sha256: [0; 32],
            },
            flags: TransferFlags::empty(),
        }
    }

    fn ready_machine(config: SenderConfig, frames: usize) -> SenderMachine {
        let mut machine = SenderMachine::new(config);
        machine.begin_preparing().unwrap();
        assert!(machine.prepared(session(frames)));
        machine.drain_events();
        machine
    }

    /// Tick until the pass completes, collecting what was shown.
    fn run_pass(machine: &mut SenderMachine) -> Vec<Emission> {
        let mut shown = Vec::new();
        for _ in 0..1000 {
            shown.push(machine.tick());
            if machine.state() == SenderState::ReadyResend {
                return shown;
            }
        }
        panic!("pass did not finish");
    }

    fn compact(shown: &[Emission]) -> Vec<(Emission, usize)> {
        let mut runs: Vec<(Emission, usize)> = Vec::new();
        for &e in shown {
            match runs.last_mut() {
                Some((last, n)) if *last == e => *n += 1,
                _ => runs.push((e, 1)),
            }
        }
        runs
    }

    #[test]
    fn full_pass_repeats_start_tail_and_eof() {
        let config = SenderConfig {
            tail_frames: 2,
            ..SenderConfig::default()
        };
        let mut machine = ready_machine(config, 4);
        machine.begin_sending().unwrap();
        let shown = run_pass(&mut machine);
        assert_eq!(
            compact(&shown),
            vec![
                (Emission::Start, 5),
                (Emission::Data(0), 1),
                (Emission::Data(1), 1),
                (Emission::Data(2), 3),
                (Emission::Data(3), 3),
                (Emission::Eof, 5),
            ]
        );
        let events = machine.drain_events();
        assert!(events.contains(&SenderEvent::Completed { resend: false }));
        assert_eq!(
            events.last(),
            Some(&SenderEvent::StateChanged(SenderState::ReadyResend))
        );
        assert_eq!(machine.tick(), Emission::Idle);
    }

    #[test]
    fn resend_visits_exactly_the_requested_indices() {
        let mut machine = ready_machine(SenderConfig::default(), 10);
        machine.begin_sending().unwrap();
        run_pass(&mut machine);

        machine.begin_resend(&[7, 2, 7, 40]).unwrap();
        let shown = run_pass(&mut machine);
        let data: Vec<u32> = shown
            .iter()
            .filter_map(|e| match e {
                Emission::Data(i) => Some(*i),
                _ => None,
            })
            .collect();
        assert_eq!(data, vec![7, 2]);
        assert!(
            machine
                .drain_events()
                .contains(&SenderEvent::Completed { resend: true })
        );
    }

    #[test]
    fn resend_progress_counts_against_list() {
        let mut machine = ready_machine(SenderConfig::default(), 10);
        machine.begin_resend(&[3, 8]).unwrap();
        for _ in 0..5 {
            machine.tick();
        }
        machine.drain_events();
        assert_eq!(machine.tick(), Emission::Data(3));
        let progress = machine.drain_events().into_iter().find_map(|e| match e {
            SenderEvent::Progress {
                current,
                total,
                index,
                percent,
                ..
            } => Some((current, total, index, percent)),
            _ => None,
        });
        assert_eq!(progress, Some((1, 2, Some(3), 50)));
    }

    #[test]
    fn invalid_resend_changes_nothing() {
        let mut machine = ready_machine(SenderConfig::default(), 3);
        assert!(matches!(
            machine.begin_resend(&[]),
            Err(DovError::InvalidResend(_))
        ));
        assert!(matches!(
            machine.begin_resend(&[3, 9]),
            Err(DovError::InvalidResend(_))
        ));
        assert_eq!(machine.state(), SenderState::Ready);
        assert!(machine.drain_events().is_empty());
    }

    #[test]
    fn resend_requires_a_session() {
        let mut machine = SenderMachine::new(SenderConfig::default());
        assert!(matches!(
            machine.begin_resend(&[0]),
            Err(DovError::InvalidState(_))
        ));
        assert_eq!(machine.state(), SenderState::Idle);
    }

    #[test]
    fn empty_file_skips_data() {
        let mut machine = ready_machine(SenderConfig::default(), 0);
        machine.begin_sending().unwrap();
        let shown = run_pass(&mut machine);
        assert_eq!(compact(&shown), vec![(Emission::Start, 5), (Emission::Eof, 5)]);
    }

    #[test]
    fn selection_only_from_idle() {
        let mut machine = ready_machine(SenderConfig::default(), 2);
        assert!(machine.begin_preparing().is_err());
        assert_eq!(machine.state(), SenderState::Ready);
    }

    #[test]
    fn failed_preparation_returns_to_idle() {
        let mut machine = SenderMachine::new(SenderConfig::default());
        machine.begin_preparing().unwrap();
        machine.prepare_failed();
        assert_eq!(machine.state(), SenderState::Idle);
        assert!(machine.session().is_none());
    }

    #[test]
    fn cancel_clears_session() {
        let mut machine = ready_machine(SenderConfig::default(), 2);
        machine.begin_sending().unwrap();
        machine.tick();
        assert!(machine.cancel());
        assert_eq!(machine.state(), SenderState::Idle);
        assert!(machine.session().is_none());
        assert_eq!(machine.tick(), Emission::Idle);
    }

    #[test]
    fn cancel_ignored_while_preparing() {
        let mut machine = SenderMachine::new(SenderConfig::default());
        machine.begin_preparing().unwrap();
        assert!(!machine.cancel());
        assert_eq!(machine.state(), SenderState::Preparing);
        assert!(machine.prepared(session(1)));
    }

    #[test]
    fn interval_follows_state() {
        let mut machine = ready_machine(SenderConfig::default(), 1);
        assert_eq!(machine.interval(), Duration::from_millis(200));
        machine.begin_sending().unwrap();
        assert_eq!(machine.interval(), Duration::from_millis(50));
    }
}
