//! Domain-specific error types for the optical link.
//!
//! All fallible operations return `Result<T, DovError>`.
//! Decode misses are not errors: they surface as `None` from the
//! codec and analyzer, because a blank or blurred capture is the
//! normal case rather than an exceptional one.

use thiserror::Error;

/// The canonical error type for the optical link.
#[derive(Debug, Error)]
pub enum DovError {
    // ── Configuration Errors ─────────────────────────────────────
    /// The layout parameters do not describe a usable frame.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    // ── Codec Errors ─────────────────────────────────────────────
    /// A bit sequence could not be packed into whole bytes.
    #[error("bit count {0} is not a multiple of 8")]
    InvalidBitCount(usize),

    /// The file name does not fit the one-byte length prefix.
    #[error("file name too long: {len} bytes (max {max})")]
    NameTooLong { len: usize, max: usize },

    /// A payload exceeds what one carrier image can hold.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    // ── State Machine Errors ─────────────────────────────────────
    /// An operation was requested in a state that does not accept it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A resend request named no usable frame index.
    #[error("invalid resend request: {0}")]
    InvalidResend(&'static str),

    // ── Transfer Errors ──────────────────────────────────────────
    /// A chunk required for assembly was never received.
    #[error("missing frame {0}")]
    MissingFrame(u32),

    /// The assembled file does not hash to the announced SHA-256.
    #[error("file integrity check failed")]
    IntegrityFailed,

    // ── Collaborator Errors ──────────────────────────────────────
    /// The capture device could not be opened or read.
    #[error("capture device error: {0}")]
    Device(String),

    /// Archiving or extracting a directory transfer failed.
    #[error("archive error: {0}")]
    Archive(String),

    /// The filesystem reported an error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for DovError {
    fn from(s: String) -> Self {
        DovError::Other(s)
    }
}

impl From<&str> for DovError {
    fn from(s: &str) -> Self {
        DovError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for DovError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        DovError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = DovError::PayloadTooLarge {
            size: 4000,
            max: 3359,
        };
        assert!(e.to_string().contains("4000"));
        assert!(e.to_string().contains("3359"));

        let e = DovError::MissingFrame(7);
        assert_eq!(e.to_string(), "missing frame 7");
    }

    #[test]
    fn from_string() {
        let e: DovError = "something broke".into();
        assert!(matches!(e, DovError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: DovError = io_err.into();
        assert!(matches!(e, DovError::Io(_)));
    }
}
