//! Receiver worker threads.
//!
//! Capture, analysis and assembly each run on their own OS thread and
//! share one `running` flag. Capture reads are blocking device calls, so
//! none of this lives on the async runtime.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use super::assembler::{AssemblyReport, assemble};
use super::machine::{AssemblyJob, ReceiverMachine};
use super::queue::ImageQueue;
use super::{ReceiverConfig, ReceiverState};
use crate::analyzer::{AnalyzerConfig, FrameAnalyzer};
use crate::detector::DetectorConfig;
use crate::error::DovError;
use crate::event::{ReceiverEvent, ReceiverEventTx, emit};
use crate::image::CarrierImage;
use crate::io::{Archiver, CaptureSource, FileStore, LocalFileStore};
use crate::layout::Layout;
use crate::payload::LogicalFrame;

/// Pause after a read that returned nothing.
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(5);
const CAPTURE_JOIN: Duration = Duration::from_millis(1500);
const WORKER_JOIN: Duration = Duration::from_millis(1000);
const JOIN_POLL: Duration = Duration::from_millis(10);

// ── Receiver ─────────────────────────────────────────────────────

/// A configured receiver that has not started capturing yet.
pub struct Receiver {
    layout: Layout,
    detector: DetectorConfig,
    analyzer: AnalyzerConfig,
    config: ReceiverConfig,
    source: Box<dyn CaptureSource>,
    store: Arc<dyn FileStore>,
    archiver: Option<Arc<dyn Archiver>>,
    events: ReceiverEventTx,
}

impl Receiver {
    pub fn new(
        layout: Layout,
        detector: DetectorConfig,
        analyzer: AnalyzerConfig,
        config: ReceiverConfig,
        source: Box<dyn CaptureSource>,
    ) -> (Self, mpsc::UnboundedReceiver<ReceiverEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let receiver = Self {
            layout,
            detector,
            analyzer,
            config,
            source,
            store: Arc::new(LocalFileStore),
            archiver: None,
            events,
        };
        (receiver, events_rx)
    }

    /// Write received files through `store` instead of the local
    /// filesystem.
    pub fn with_store(mut self, store: Arc<dyn FileStore>) -> Self {
        self.store = store;
        self
    }

    /// Enable directory transfers.
    pub fn with_archiver(mut self, archiver: Arc<dyn Archiver>) -> Self {
        self.archiver = Some(archiver);
        self
    }

    /// Open the capture device and spawn the workers.
    pub fn start(mut self) -> Result<ReceiverHandle, DovError> {
        if let Err(e) = self.source.open(self.config.device_id) {
            error!(device = self.config.device_id, "failed to open capture device: {e}");
            emit(
                &self.events,
                ReceiverEvent::Error(format!("failed to open capture device: {e}")),
            );
            return Err(e);
        }
        info!(
            device = self.config.device_id,
            save_dir = %self.config.save_dir.display(),
            "receiver started"
        );

        let running = Arc::new(AtomicBool::new(true));
        let queue = Arc::new(ImageQueue::new(self.config.queue_capacity));
        let state = Arc::new(watch::channel(ReceiverState::Scanning).0);
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();

        let capture = spawn_worker(
            "dov-capture",
            capture_loop(
                self.source,
                Arc::clone(&queue),
                Arc::clone(&running),
                self.events.clone(),
            ),
        )?;

        let chunk_size = self.layout.payload_capacity();
        let analysis = AnalysisWorker {
            analyzer: FrameAnalyzer::new(self.layout, self.detector, self.analyzer),
            machine: ReceiverMachine::new(self.config.clone(), self.events.clone())
                .with_chunk_size(chunk_size),
            queue,
            running: Arc::clone(&running),
            state: Arc::clone(&state),
            jobs: jobs_tx,
            reports: reports_rx,
            poll: self.config.poll_interval(),
        };
        let analyzer = spawn_worker("dov-analyzer", move || analysis.run());

        let assembly = AssemblyWorker {
            jobs: jobs_rx,
            reports: reports_tx,
            save_dir: self.config.save_dir.clone(),
            store: self.store,
            archiver: self.archiver,
            events: self.events.clone(),
        };
        let assembler = spawn_worker("dov-assembler", move || assembly.run());

        let (analyzer, assembler) = match (analyzer, assembler) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => {
                running.store(false, Ordering::SeqCst);
                join_within("capture", capture, CAPTURE_JOIN);
                return Err(e);
            }
        };

        Ok(ReceiverHandle {
            running,
            state,
            events: self.events,
            capture: Some(capture),
            analyzer: Some(analyzer),
            assembler: Some(assembler),
        })
    }
}

fn spawn_worker(
    name: &str,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, DovError> {
    let handle = thread::Builder::new().name(name.to_string()).spawn(body)?;
    Ok(handle)
}

// ── Workers ──────────────────────────────────────────────────────

fn capture_loop(
    mut source: Box<dyn CaptureSource>,
    queue: Arc<ImageQueue>,
    running: Arc<AtomicBool>,
    events: ReceiverEventTx,
) -> impl FnOnce() + Send + 'static {
    move || {
        debug!("capture worker started");
        while running.load(Ordering::SeqCst) {
            match source.read() {
                Ok(Some(image)) => {
                    let image = Arc::new(image);
                    emit(&events, ReceiverEvent::Preview(Arc::clone(&image)));
                    if queue.push(image) {
                        trace!("analysis behind, dropped oldest capture");
                    }
                }
                Ok(None) => thread::sleep(EMPTY_READ_BACKOFF),
                Err(e) => {
                    error!("capture failed: {e}");
                    emit(&events, ReceiverEvent::Error(format!("capture failed: {e}")));
                    running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
        source.close();
        debug!(dropped = queue.dropped(), "capture worker stopped");
    }
}

struct AnalysisWorker {
    analyzer: FrameAnalyzer,
    machine: ReceiverMachine,
    queue: Arc<ImageQueue>,
    running: Arc<AtomicBool>,
    state: Arc<watch::Sender<ReceiverState>>,
    jobs: mpsc::UnboundedSender<AssemblyJob>,
    reports: mpsc::UnboundedReceiver<AssemblyReport>,
    poll: Duration,
}

impl AnalysisWorker {
    fn run(mut self) {
        debug!("analyzer worker started");
        self.machine.start(Instant::now());
        self.publish_state();

        while self.running.load(Ordering::SeqCst) {
            while let Ok(report) = self.reports.try_recv() {
                self.machine.on_assembly(report);
            }
            if let Some(image) = self.queue.pop_timeout(self.poll) {
                self.process(&image);
            }
            self.machine.check_timeouts(Instant::now());
            self.publish_state();
        }

        self.queue.clear();
        self.machine.stop();
        self.publish_state();
        debug!("analyzer worker stopped");
    }

    fn process(&mut self, image: &CarrierImage) {
        let Some(found) = self.analyzer.analyze_header(image) else {
            return;
        };
        let now = Instant::now();
        self.machine.mark_valid(now);
        if !self.machine.wants_payload(&found.header) {
            return;
        }

        let header = found.header;
        let Some(payload) = self.analyzer.decode_payload(image, &found) else {
            trace!(kind = %header.frame_type, index = header.frame_index, "payload unreadable");
            return;
        };
        let Some(frame) = LogicalFrame::from_parts(header.frame_type, header.frame_index, payload)
        else {
            trace!(kind = %header.frame_type, "payload did not parse");
            return;
        };
        if let Some(job) = self.machine.on_frame(frame, now) {
            if self.jobs.send(job).is_err() {
                error!("assembler worker is gone");
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }
}

struct AssemblyWorker {
    jobs: mpsc::UnboundedReceiver<AssemblyJob>,
    reports: mpsc::UnboundedSender<AssemblyReport>,
    save_dir: PathBuf,
    store: Arc<dyn FileStore>,
    archiver: Option<Arc<dyn Archiver>>,
    events: ReceiverEventTx,
}

impl AssemblyWorker {
    fn run(mut self) {
        debug!("assembler worker started");
        // Ends once the analyzer worker drops its job sender.
        while let Some(job) = self.jobs.blocking_recv() {
            let report = assemble(
                job,
                &self.save_dir,
                self.store.as_ref(),
                self.archiver.as_deref(),
                &self.events,
            );
            if self.reports.send(report).is_err() {
                break;
            }
        }
        debug!("assembler worker stopped");
    }
}

// ── ReceiverHandle ───────────────────────────────────────────────

/// Control side of a started [`Receiver`].
pub struct ReceiverHandle {
    running: Arc<AtomicBool>,
    state: Arc<watch::Sender<ReceiverState>>,
    events: ReceiverEventTx,
    capture: Option<JoinHandle<()>>,
    analyzer: Option<JoinHandle<()>>,
    assembler: Option<JoinHandle<()>>,
}

impl ReceiverHandle {
    pub fn state(&self) -> ReceiverState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ReceiverState> {
        self.state.subscribe()
    }

    /// Whether the workers are still running. Turns false on its own when
    /// the capture device fails.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Flag that stops every worker when cleared.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Stop all workers. Blocks for at most a few seconds; a worker stuck
    /// in a device call is left detached.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture.take() {
            join_within("capture", handle, CAPTURE_JOIN);
        }
        if let Some(handle) = self.analyzer.take() {
            join_within("analyzer", handle, WORKER_JOIN);
        }
        if let Some(handle) = self.assembler.take() {
            join_within("assembler", handle, WORKER_JOIN);
        }

        if self.state.send_replace(ReceiverState::Stopped) != ReceiverState::Stopped {
            emit(
                &self.events,
                ReceiverEvent::StateChanged {
                    state: ReceiverState::Stopped,
                    message: "stopped".into(),
                },
            );
        }
        info!("receiver stopped");
    }
}

fn join_within(name: &str, handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("{name} worker did not stop within {timeout:?}, detaching");
            return;
        }
        thread::sleep(JOIN_POLL);
    }
    if handle.join().is_err() {
        error!("{name} worker panicked");
    }
}

// ── Tests ────────────────────────────────────────────────────────
