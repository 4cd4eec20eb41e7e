//! Turns a closed reception session into a file on disk.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::machine::{AssemblyJob, ReceptionSession};
use crate::error::DovError;
use crate::event::{ReceiverEvent, ReceiverEventTx, emit};
use crate::file::{sanitize_name, write_chunks};
use crate::io::{Archiver, FileStore};

/// Suffix of the temporary file a directory transfer is written to before
/// extraction.
const ARCHIVE_SUFFIX: &str = ".archive";

#[derive(Debug)]
pub enum AssemblyOutcome {
    /// The file (or extracted directory) now lives at this path.
    Completed(PathBuf),
    /// Chunks are missing. The session is handed back so a resend can
    /// complete it.
    Incomplete {
        missing: Vec<u32>,
        session: ReceptionSession,
    },
    Failed(String),
}

/// Assembler verdict, tagged with the session generation it belongs to.
#[derive(Debug)]
pub struct AssemblyReport {
    pub generation: u64,
    pub outcome: AssemblyOutcome,
}

/// Write, verify and (for directories) extract the session in `job`.
pub fn assemble(
    job: AssemblyJob,
    save_dir: &Path,
    store: &dyn FileStore,
    archiver: Option<&dyn Archiver>,
    events: &ReceiverEventTx,
) -> AssemblyReport {
    let AssemblyJob {
        generation,
        session,
    } = job;

    let outcome = if session.is_complete() {
        match write_session(&session, save_dir, store, archiver, events) {
            Ok(path) => AssemblyOutcome::Completed(path),
            Err(DovError::IntegrityFailed) => {
                AssemblyOutcome::Failed("SHA-256 mismatch, file is corrupt".into())
            }
            Err(e) => AssemblyOutcome::Failed(format!("assembly failed: {e}")),
        }
    } else {
        let missing = session.missing();
        info!(
            missing = missing.len(),
            total = session.total_frames(),
            "session incomplete"
        );
        AssemblyOutcome::Incomplete { missing, session }
    };

    AssemblyReport {
        generation,
        outcome,
    }
}

fn write_session(
    session: &ReceptionSession,
    save_dir: &Path,
    store: &dyn FileStore,
    archiver: Option<&dyn Archiver>,
    events: &ReceiverEventTx,
) -> Result<PathBuf, DovError> {
    let start = session.start();
    let name = sanitize_name(&start.name);

    let archiver = match (start.is_directory(), archiver) {
        (true, None) => {
            return Err(DovError::Archive(
                "directory transfer received but no archiver is configured".into(),
            ));
        }
        (true, Some(archiver)) => Some(archiver),
        (false, _) => None,
    };
    let path = match archiver {
        Some(_) => save_dir.join(format!("{name}{ARCHIVE_SUFFIX}")),
        None => save_dir.join(&name),
    };

    debug!(path = %path.display(), frames = session.total_frames(), "writing chunks");
    let mut writer = store.create(&path)?;
    write_chunks(
        &mut writer,
        session.chunks(),
        session.total_frames(),
        |written, total| emit(events, ReceiverEvent::AssemblyProgress { written, total }),
    )?;
    drop(writer);

    let actual = store.sha256(&path)?;
    if actual != start.sha256 {
        warn!(
            expected = %hex::encode(start.sha256),
            actual = %hex::encode(actual),
            "integrity check failed"
        );
        if let Err(e) = store.remove(&path) {
            warn!("could not remove corrupt file {}: {e}", path.display());
        }
        return Err(DovError::IntegrityFailed);
    }

    let Some(archiver) = archiver else {
        return Ok(path);
    };
    let target = save_dir.join(&name);
    archiver.extract(&path, &target)?;
    store.remove(&path)?;
    Ok(target)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Mutex;

    use sha2::{Digest, Sha256};
    use tokio::sync::mpsc;

    use super::*;
    use crate::io::LocalFileStore;
    use crate::payload::{StartPayload, TransferFlags};

    fn session_for(name: &str, data: &[u8], chunk: usize, flags: TransferFlags) -> ReceptionSession {
        let chunks: Vec<&[u8]> = data.chunks(chunk).collect();
        let start = StartPayload {
            name: name.into(),
            file_size: data.len() as u64,
            total_frames: chunks.len() as u32,
            sha256: Sha256::digest(data).into(),
            flags,
        };
        let mut session = ReceptionSession::new(start);
        for (i, c) in chunks.iter().enumerate() {
            session.insert(i as u32, c.to_vec());
        }
        session
    }

    fn job(session: ReceptionSession) -> AssemblyJob {
        AssemblyJob {
            generation: 3,
            session,
        }
    }

    /// Copies the archive into `target/contents` and records calls.
    #[derive(Default)]
    struct CopyArchiver {
        extracted: Mutex<Vec<(PathBuf, PathBuf)>>,
    }

    impl Archiver for CopyArchiver {
        fn archive(&self, dir: &Path) -> Result<PathBuf, DovError> {
            Ok(dir.with_extension("archive"))
        }

        fn extract(&self, archive: &Path, target_dir: &Path) -> Result<(), DovError> {
            fs::create_dir_all(target_dir)?;
            fs::copy(archive, target_dir.join("contents"))?;
            self.extracted
                .lock()
                .unwrap()
                .push((archive.to_path_buf(), target_dir.to_path_buf()));
            Ok(())
        }
    }

    #[test]
    fn writes_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let data: Vec<u8> = (0..250u32).map(|i| (i * 7) as u8).collect();
        let session = session_for("../evil/report.txt", &data, 64, TransferFlags::empty());

        let report = assemble(job(session), dir.path(), &LocalFileStore, None, &tx);
        assert_eq!(report.generation, 3);
        let AssemblyOutcome::Completed(path) = report.outcome else {
            panic!("expected completion");
        };
        assert_eq!(path, dir.path().join("report.txt"));
        assert_eq!(fs::read(&path).unwrap(), data);

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            if let ReceiverEvent::AssemblyProgress { written, total } = event {
                last = Some((written, total));
            }
        }
        assert_eq!(last, Some((4, 4)));
    }

    #[test]
    fn incomplete_session_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let data = vec![1u8; 100];
        let full = session_for("a.bin", &data, 10, TransferFlags::empty());

        let mut partial = ReceptionSession::new(full.start().clone());
        for i in [0u32, 1, 2, 4, 5, 6, 7, 8] {
            partial.insert(i, vec![1; 10]);
        }

        let report = assemble(job(partial), dir.path(), &LocalFileStore, None, &tx);
        let AssemblyOutcome::Incomplete { missing, session } = report.outcome else {
            panic!("expected incomplete");
        };
        assert_eq!(missing, vec![3, 9]);
        assert_eq!(session.received_count(), 8);
        assert!(!dir.path().join("a.bin").exists());
    }

    #[test]
    fn hash_mismatch_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let data = vec![5u8; 40];
        let good = session_for("a.bin", &data, 10, TransferFlags::empty());

        let mut corrupt = ReceptionSession::new(good.start().clone());
        for i in 0..4u32 {
            corrupt.insert(i, vec![if i == 2 { 6 } else { 5 }; 10]);
        }

        let report = assemble(job(corrupt), dir.path(), &LocalFileStore, None, &tx);
        assert!(matches!(report.outcome, AssemblyOutcome::Failed(ref m) if m.contains("SHA-256")));
        assert!(!dir.path().join("a.bin").exists());
    }

    #[test]
    fn directory_transfer_is_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let data = b"archive bytes".to_vec();
        let session = session_for("photos", &data, 5, TransferFlags::DIRECTORY);
        let archiver = CopyArchiver::default();

        let report = assemble(
            job(session),
            dir.path(),
            &LocalFileStore,
            Some(&archiver),
            &tx,
        );
        let AssemblyOutcome::Completed(path) = report.outcome else {
            panic!("expected completion");
        };
        assert_eq!(path, dir.path().join("photos"));
        assert_eq!(fs::read(path.join("contents")).unwrap(), data);
        assert!(!dir.path().join("photos.archive").exists());

        let calls = archiver.extracted.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, dir.path().join("photos.archive"));
    }

    #[test]
    fn directory_transfer_without_archiver_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = session_for("photos", b"zz", 5, TransferFlags::DIRECTORY);

        let report = assemble(job(session), dir.path(), &LocalFileStore, None, &tx);
        assert!(matches!(report.outcome, AssemblyOutcome::Failed(ref m) if m.contains("archiver")));
    }

    #[test]
    fn empty_file_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = session_for("empty.txt", b"", 5, TransferFlags::empty());
        assert_eq!(session.total_frames(), 0);

        let report = assemble(job(session), dir.path(), &LocalFileStore, None, &tx);
        let AssemblyOutcome::Completed(path) = report.outcome else {
            panic!("expected completion");
        };
        assert_eq!(fs::read(path).unwrap().len(), 0);
    }
}
