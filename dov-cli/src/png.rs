//! PNG-sequence stand-ins for the screen and the camera.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Sender};
use dov_core::{CaptureSource, CarrierImage, DisplaySink, DovError, PixelFormat};
use image::{ImageFormat, RgbImage};
use tracing::{debug, info, warn};

/// File name of the `n`-th displayed frame, counting from 1.
pub fn frame_name(n: u64) -> String {
    format!("frame-{n:06}.png")
}

pub fn save_png(image: &CarrierImage, path: &Path) -> Result<(), DovError> {
    let rgb = RgbImage::from_raw(image.width(), image.height(), image.to_rgb8())
        .ok_or_else(|| DovError::Other("carrier image buffer has the wrong size".into()))?;
    rgb.save_with_format(path, ImageFormat::Png)
        .map_err(|e| DovError::Device(format!("cannot write {}: {e}", path.display())))
}

pub fn load_png(path: &Path) -> Result<CarrierImage, DovError> {
    let rgb = image::open(path)
        .map_err(|e| DovError::Device(format!("cannot read {}: {e}", path.display())))?
        .to_rgb8();
    let (width, height) = rgb.dimensions();
    CarrierImage::from_raw(width, height, width * 3, PixelFormat::Rgb8, rgb.into_raw())
}

// ── PngSequenceSink ──────────────────────────────────────────────

/// Frames the writer may fall behind by before `show` waits for it.
const WRITER_BACKLOG: usize = 8;

/// Writes every displayed image as `frame-NNNNNN.png`.
///
/// `show` runs on the sender loop, so encoding and file writes happen on a
/// dedicated writer thread. Dropping the sink flushes the backlog.
pub struct PngSequenceSink {
    frames: Option<Sender<CarrierImage>>,
    writer: Option<JoinHandle<Result<u64, DovError>>>,
    queued: u64,
}

impl PngSequenceSink {
    pub fn create(dir: &Path) -> Result<Self, DovError> {
        fs::create_dir_all(dir)?;
        let (frames, backlog) = channel::bounded::<CarrierImage>(WRITER_BACKLOG);
        let dir = dir.to_path_buf();
        let writer = thread::Builder::new()
            .name("dov-png-writer".into())
            .spawn(move || {
                let mut written = 0;
                for image in backlog {
                    save_png(&image, &dir.join(frame_name(written + 1)))?;
                    written += 1;
                }
                Ok(written)
            })?;
        Ok(Self {
            frames: Some(frames),
            writer: Some(writer),
            queued: 0,
        })
    }

    /// Frames accepted by `show` so far.
    pub fn queued(&self) -> u64 {
        self.queued
    }

    /// Wait for the backlog to reach disk. Returns the number of files
    /// written, or the first write error.
    pub fn finish(mut self) -> Result<u64, DovError> {
        self.join_writer()
    }

    fn join_writer(&mut self) -> Result<u64, DovError> {
        self.frames = None;
        let Some(writer) = self.writer.take() else {
            return Ok(0);
        };
        writer
            .join()
            .map_err(|_| DovError::Other("PNG writer panicked".into()))?
    }
}

impl DisplaySink for PngSequenceSink {
    fn show(&mut self, image: &CarrierImage) -> Result<(), DovError> {
        let Some(frames) = &self.frames else {
            return Err(DovError::Device("PNG writer already stopped".into()));
        };
        if frames.send(image.clone()).is_err() {
            // The writer only hangs up after a failed write.
            return match self.join_writer() {
                Err(e) => Err(e),
                Ok(_) => Err(DovError::Device("PNG writer stopped".into())),
            };
        }
        self.queued += 1;
        Ok(())
    }
}

impl Drop for PngSequenceSink {
    fn drop(&mut self) {
        match self.join_writer() {
            Ok(written) => debug!(written, "PNG writer finished"),
            Err(e) => warn!("PNG writer failed: {e}"),
        }
    }
}

// ── PngSequenceSource ────────────────────────────────────────────

/// Replays a directory of PNG files in name order, one per `interval`.
pub struct PngSequenceSource {
    dir: PathBuf,
    interval: Duration,
    files: VecDeque<PathBuf>,
    last_read: Option<Instant>,
    exhausted: Arc<AtomicBool>,
}

impl PngSequenceSource {
    pub fn new(dir: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            interval,
            files: VecDeque::new(),
            last_read: None,
            exhausted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set once every file has been handed out.
    pub fn exhausted_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.exhausted)
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_read {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }
        self.last_read = Some(Instant::now());
    }
}

impl CaptureSource for PngSequenceSource {
    /// The device id is meaningless for a directory and is ignored.
    fn open(&mut self, _device_id: u32) -> Result<(), DovError> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| DovError::Device(format!("cannot open {}: {e}", self.dir.display())))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
            })
            .collect();
        files.sort();

        if files.is_empty() {
            warn!(dir = %self.dir.display(), "no PNG files to replay");
        } else {
            info!(dir = %self.dir.display(), count = files.len(), "replaying PNG sequence");
        }
        self.files = files.into();
        self.exhausted.store(self.files.is_empty(), Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<CarrierImage>, DovError> {
        let Some(path) = self.files.pop_front() else {
            self.exhausted.store(true, Ordering::SeqCst);
            thread::sleep(self.interval);
            return Ok(None);
        };
        self.pace();
        match load_png(&path) {
            Ok(image) => {
                debug!(file = %path.display(), "frame read");
                Ok(Some(image))
            }
            Err(e) => {
                warn!("skipping unreadable frame: {e}");
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.files.clear();
    }
}

// ── Tests ────────────────────────────────────────────────────────
