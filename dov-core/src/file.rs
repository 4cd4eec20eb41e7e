//! File chunking on the sending side and in-order assembly on the
//! receiving side.

use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::DovError;

/// A file split into frame-sized chunks, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedFile {
    pub name: String,
    pub size: u64,
    pub chunks: Vec<Vec<u8>>,
    pub sha256: [u8; 32],
}

impl PreparedFile {
    pub fn total_frames(&self) -> u32 {
        self.chunks.len() as u32
    }
}

/// Read `path` in `chunk_size` pieces, hashing as it goes.
pub fn chunk_file(path: &Path, chunk_size: usize) -> Result<PreparedFile, DovError> {
    if chunk_size == 0 {
        return Err(DovError::Other("chunk size must be > 0".into()));
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| DovError::Other(format!("{} has no file name", path.display())))?;

    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut chunks = Vec::new();
    let mut size = 0u64;

    loop {
        let mut chunk = vec![0u8; chunk_size];
        let filled = read_full(&mut file, &mut chunk)?;
        if filled == 0 {
            break;
        }
        chunk.truncate(filled);
        hasher.update(&chunk);
        size += filled as u64;
        chunks.push(chunk);
        if filled < chunk_size {
            break;
        }
    }

    Ok(PreparedFile {
        name,
        size,
        chunks,
        sha256: hasher.finalize().into(),
    })
}

/// Fill `buf` unless the reader hits end of file first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize, DovError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Write chunks `0..total` in index order.
///
/// `progress` is called after each chunk with `(written, total)`. Fails
/// with [`DovError::MissingFrame`] at the first absent index, leaving a
/// partial file behind for the caller to remove.
pub fn write_chunks(
    writer: &mut impl Write,
    chunks: &HashMap<u32, Vec<u8>>,
    total: u32,
    mut progress: impl FnMut(u32, u32),
) -> Result<(), DovError> {
    for index in 0..total {
        let chunk = chunks.get(&index).ok_or(DovError::MissingFrame(index))?;
        writer.write_all(chunk)?;
        progress(index + 1, total);
    }
    writer.flush()?;
    Ok(())
}

/// SHA-256 of everything `reader` yields.
pub fn sha256_reader(reader: &mut impl Read) -> Result<[u8; 32], DovError> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = read_full(reader, &mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Reduce an announced name to a bare file name that cannot escape the
/// save directory.
pub fn sanitize_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or("");
    match last {
        "" | "." | ".." => "received.bin".to_string(),
        other => other.to_string(),
    }
}

// ── Tests ────────────────────────────────────────────────────────
