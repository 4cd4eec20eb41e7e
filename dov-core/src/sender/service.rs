//! Tokio task that owns the sender state machine.
//!
//! One loop multiplexes front-end commands, preparation results and the
//! frame ticker. Every state change, image update and progress event
//! happens on that loop. File reading, archiving and START/EOF rendering
//! run on a blocking worker and report back over a channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::machine::{Emission, SenderMachine, TransferSession};
use super::{SenderConfig, SenderState};
use crate::codec::FrameCodec;
use crate::error::DovError;
use crate::event::{SenderEvent, SenderEventTx, emit};
use crate::file::chunk_file;
use crate::image::CarrierImage;
use crate::io::{Archiver, DisplaySink};
use crate::layout::Layout;
use crate::payload::{MAX_NAME_LEN, TransferFlags};

/// How long [`SenderHandle::stop`] waits before aborting the loop.
const STOP_GRACE: Duration = Duration::from_millis(500);

/// Requests from the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderCommand {
    SelectFile(PathBuf),
    SelectDirectory(PathBuf),
    BeginSending,
    Resend(Vec<u32>),
    Cancel,
}

/// Messages from the preparation worker.
enum Preparation {
    Progress { message: String, percent: u8 },
    Done(Box<PreparedTransfer>),
    Failed(String),
}

struct PreparedTransfer {
    session: TransferSession,
    start: CarrierImage,
    eof: CarrierImage,
}

// ── Sender ───────────────────────────────────────────────────────

pub struct Sender {
    machine: SenderMachine,
    codec: FrameCodec,
    sink: Box<dyn DisplaySink>,
    archiver: Option<Arc<dyn Archiver>>,
    events: SenderEventTx,
    state_tx: watch::Sender<SenderState>,
    idle_image: CarrierImage,
    start_image: Option<CarrierImage>,
    eof_image: Option<CarrierImage>,
    /// Rendered image of the DATA frame currently on screen.
    data_image: Option<(u32, CarrierImage)>,
}

impl Sender {
    /// Build a sender painting on `sink`. Returns the event stream
    /// alongside.
    pub fn new(
        layout: Layout,
        config: SenderConfig,
        sink: Box<dyn DisplaySink>,
    ) -> (Self, mpsc::UnboundedReceiver<SenderEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SenderState::Idle);
        let codec = FrameCodec::new(layout);
        let sender = Self {
            machine: SenderMachine::new(config),
            idle_image: codec.encode_idle(),
            codec,
            sink,
            archiver: None,
            events,
            state_tx,
            start_image: None,
            eof_image: None,
            data_image: None,
        };
        (sender, events_rx)
    }

    /// Enable directory transfers.
    pub fn with_archiver(mut self, archiver: Arc<dyn Archiver>) -> Self {
        self.archiver = Some(archiver);
        self
    }

    /// Start the loop on the current runtime.
    pub fn spawn(self) -> SenderHandle {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let state = self.state_tx.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(commands_rx, cancel.clone()));
        SenderHandle {
            commands,
            state,
            cancel,
            task,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SenderCommand>,
        cancel: CancellationToken,
    ) {
        let (prep_tx, mut prep_rx) = mpsc::unbounded_channel();
        let mut period = self.machine.interval();
        let mut ticker = new_ticker(period);
        emit(&self.events, SenderEvent::StateChanged(self.machine.state()));
        info!("sender started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command, &prep_tx),
                    None => break,
                },
                Some(update) = prep_rx.recv() => self.handle_preparation(update),
                _ = ticker.tick() => self.on_tick(),
            }

            self.publish();
            let next = self.machine.interval();
            if next != period {
                period = next;
                ticker = new_ticker(period);
            }
        }
        info!("sender stopped");
    }

    fn handle_command(&mut self, command: SenderCommand, prep_tx: &mpsc::UnboundedSender<Preparation>) {
        debug!(?command, "sender command");
        let result = match command {
            SenderCommand::SelectFile(path) => self.select(path, false, prep_tx),
            SenderCommand::SelectDirectory(path) => self.select(path, true, prep_tx),
            SenderCommand::BeginSending => self.machine.begin_sending(),
            SenderCommand::Resend(indices) => self.machine.begin_resend(&indices),
            SenderCommand::Cancel => {
                if self.machine.cancel() {
                    self.clear_frames();
                }
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("sender command rejected: {e}");
            emit(&self.events, SenderEvent::Error(e.to_string()));
        }
    }

    fn select(
        &mut self,
        path: PathBuf,
        directory: bool,
        prep_tx: &mpsc::UnboundedSender<Preparation>,
    ) -> Result<(), DovError> {
        self.machine.begin_preparing()?;
        self.clear_frames();
        info!(path = %path.display(), directory, "preparing transfer");

        let codec = self.codec.clone();
        let archiver = self.archiver.clone();
        let tx = prep_tx.clone();
        tokio::task::spawn_blocking(move || {
            let progress = |message: &str, percent: u8| {
                let _ = tx.send(Preparation::Progress {
                    message: message.to_string(),
                    percent,
                });
            };
            let update = match prepare(&path, directory, archiver.as_deref(), &codec, &progress) {
                Ok(prepared) => Preparation::Done(Box::new(prepared)),
                Err(e) => Preparation::Failed(format!("failed to prepare {}: {e}", path.display())),
            };
            let _ = tx.send(update);
        });
        Ok(())
    }

    fn handle_preparation(&mut self, update: Preparation) {
        match update {
            Preparation::Progress { message, percent } => {
                self.machine.prepare_progress(message, percent);
            }
            Preparation::Done(prepared) => {
                let PreparedTransfer {
                    session,
                    start,
                    eof,
                } = *prepared;
                if self.machine.prepared(session) {
                    self.start_image = Some(start);
                    self.eof_image = Some(eof);
                }
            }
            Preparation::Failed(message) => {
                error!("{message}");
                emit(&self.events, SenderEvent::Error(message));
                self.machine.prepare_failed();
            }
        }
    }

    fn on_tick(&mut self) {
        let emission = self.machine.tick();
        if let Emission::Data(index) = emission {
            self.ensure_data_image(index);
        }

        let image = match emission {
            Emission::Idle => Some(&self.idle_image),
            Emission::Start => self.start_image.as_ref(),
            Emission::Data(index) => match &self.data_image {
                Some((cached, image)) if *cached == index => Some(image),
                _ => None,
            },
            Emission::Eof => self.eof_image.as_ref(),
        };
        let Some(image) = image else {
            return;
        };
        // Runs on the loop; sinks hand slow output off to their own thread.
        if let Err(e) = self.sink.show(image) {
            warn!("display failed: {e}");
            emit(&self.events, SenderEvent::Error(e.to_string()));
        }
    }

    /// Render DATA frame `index` unless it is the one already held. Only
    /// the current frame is kept, so repeats across ticks reuse it.
    fn ensure_data_image(&mut self, index: u32) {
        if matches!(self.data_image, Some((cached, _)) if cached == index) {
            return;
        }
        self.data_image = None;
        let Some(chunk) = self.machine.session().and_then(|s| s.chunk(index)) else {
            return;
        };
        match self.codec.encode_data(index, chunk) {
            Ok(image) => self.data_image = Some((index, image)),
            Err(e) => {
                error!(index, "failed to encode DATA frame: {e}");
                emit(&self.events, SenderEvent::Error(e.to_string()));
            }
        }
    }

    fn clear_frames(&mut self) {
        self.start_image = None;
        self.eof_image = None;
        self.data_image = None;
    }

    /// Forward queued machine events and mirror the state.
    fn publish(&mut self) {
        for event in self.machine.drain_events() {
            if let SenderEvent::StateChanged(state) = event {
                self.state_tx.send_replace(state);
            }
            emit(&self.events, event);
        }
    }
}

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Read, chunk and hash the selection and render its START and EOF
/// frames. Runs on a blocking thread.
fn prepare(
    path: &Path,
    directory: bool,
    archiver: Option<&dyn Archiver>,
    codec: &FrameCodec,
    progress: &dyn Fn(&str, u8),
) -> Result<PreparedTransfer, DovError> {
    let capacity = codec.payload_capacity();
    let (mut file, flags) = if directory {
        let archiver = archiver
            .ok_or_else(|| DovError::Archive("no archiver configured for directories".into()))?;
        progress("archiving directory", 0);
        let archive = archiver.archive(path)?;
        progress("reading archive", 10);
        let chunked = chunk_file(&archive, capacity);
        if let Err(e) = std::fs::remove_file(&archive) {
            warn!(archive = %archive.display(), "could not remove temporary archive: {e}");
        }
        let mut file = chunked?;
        if let Some(name) = path.file_name() {
            file.name = name.to_string_lossy().into_owned();
        }
        (file, TransferFlags::DIRECTORY)
    } else {
        progress("reading file", 0);
        (chunk_file(path, capacity)?, TransferFlags::empty())
    };

    if file.name.len() > MAX_NAME_LEN {
        let mut end = MAX_NAME_LEN;
        while !file.name.is_char_boundary(end) {
            end -= 1;
        }
        warn!(name = %file.name, "file name longer than {MAX_NAME_LEN} bytes, truncating");
        file.name.truncate(end);
    }

    let session = TransferSession { file, flags };
    let start = codec.encode_start(&session.start_payload())?;
    let eof = codec.encode_eof(&session.eof_payload())?;
    progress("ready", 100);
    Ok(PreparedTransfer {
        session,
        start,
        eof,
    })
}

// ── SenderHandle ─────────────────────────────────────────────────

/// Front-end side of a running [`Sender`].
pub struct SenderHandle {
    commands: mpsc::UnboundedSender<SenderCommand>,
    state: watch::Receiver<SenderState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SenderHandle {
    pub fn command(&self, command: SenderCommand) -> Result<(), DovError> {
        self.commands.send(command)?;
        Ok(())
    }

    pub fn select_file(&self, path: impl Into<PathBuf>) -> Result<(), DovError> {
        self.command(SenderCommand::SelectFile(path.into()))
    }

    pub fn select_directory(&self, path: impl Into<PathBuf>) -> Result<(), DovError> {
        self.command(SenderCommand::SelectDirectory(path.into()))
    }

    pub fn begin_sending(&self) -> Result<(), DovError> {
        self.command(SenderCommand::BeginSending)
    }

    pub fn resend(&self, indices: Vec<u32>) -> Result<(), DovError> {
        self.command(SenderCommand::Resend(indices))
    }

    pub fn cancel(&self) -> Result<(), DovError> {
        self.command(SenderCommand::Cancel)
    }

    pub fn state(&self) -> SenderState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SenderState> {
        self.state.clone()
    }

    /// Stop the loop, aborting it if it does not exit within 500 ms.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if tokio::time::timeout(STOP_GRACE, &mut self.task).await.is_err() {
            warn!("sender loop did not stop in time, aborting");
            self.task.abort();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
