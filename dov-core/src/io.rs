//! Collaborators the link drives but does not implement: the camera, the
//! display, directory archiving and the filesystem.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::DovError;
use crate::file::sha256_reader;
use crate::image::CarrierImage;

/// A camera or any other source of captured images.
///
/// Used from a single blocking worker thread.
pub trait CaptureSource: Send {
    fn open(&mut self, device_id: u32) -> Result<(), DovError>;

    /// Block for the next capture. `Ok(None)` means nothing was available
    /// this time; the caller simply tries again.
    fn read(&mut self) -> Result<Option<CarrierImage>, DovError>;

    fn close(&mut self);
}

/// Where the sender shows carrier images.
///
/// `show` is called from the sender's async loop on every tick and must
/// return quickly. Sinks that encode or write files do so on a thread of
/// their own.
pub trait DisplaySink: Send {
    fn show(&mut self, image: &CarrierImage) -> Result<(), DovError>;
}

/// Packs a directory into one file for transfer and unpacks it again.
pub trait Archiver: Send + Sync {
    /// Archive `dir`, returning the path of the archive file.
    fn archive(&self, dir: &Path) -> Result<PathBuf, DovError>;

    fn extract(&self, archive: &Path, target_dir: &Path) -> Result<(), DovError>;
}

/// Output storage for received files.
pub trait FileStore: Send + Sync {
    fn create(&self, path: &Path) -> Result<Box<dyn Write + Send>, DovError>;

    fn sha256(&self, path: &Path) -> Result<[u8; 32], DovError>;

    fn remove(&self, path: &Path) -> Result<(), DovError>;
}

// ── LocalFileStore ───────────────────────────────────────────────

/// [`FileStore`] on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileStore;

impl FileStore for LocalFileStore {
    fn create(&self, path: &Path) -> Result<Box<dyn Write + Send>, DovError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Box::new(BufWriter::new(File::create(path)?)))
    }

    fn sha256(&self, path: &Path) -> Result<[u8; 32], DovError> {
        let mut reader = BufReader::new(File::open(path)?);
        sha256_reader(&mut reader)
    }

    fn remove(&self, path: &Path) -> Result<(), DovError> {
        fs::remove_file(path)?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
