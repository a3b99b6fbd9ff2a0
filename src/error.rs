//! Error types shared by sessions and decoding engines.

use std::io;
use thiserror::Error;

/// Status severity reported by a decoding engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// The operation should simply be invoked again.
    Retry,
    /// The operation completed but something looked wrong.
    Warn,
    /// The current operation failed; the engine may still be usable.
    Failed,
    /// The engine cannot continue.
    Fatal,
}

/// Error raised by a decoding engine, carrying its textual last-error string.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EngineError {
    pub severity: Severity,
    pub message: String,
}

impl EngineError {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    pub fn retry() -> Self {
        Self::new(Severity::Retry, "Retry the operation")
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(Severity::Warn, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(Severity::Failed, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(Severity::Fatal, message)
    }

    pub fn is_retry(&self) -> bool {
        self.severity == Severity::Retry
    }
}

impl From<io::Error> for EngineError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => EngineError::retry(),
            io::ErrorKind::UnexpectedEof => EngineError::fatal(messages::TRUNCATED),
            _ => EngineError::fatal(e.to_string()),
        }
    }
}

/// Literal last-error strings raised by the built-in engines.
pub mod messages {
    pub const TRUNCATED: &str = "Truncated input file";
    pub const DAMAGED: &str = "Damaged archive";
    pub const BAD_CHECKSUM: &str = "Bad header checksum";
    pub const BAD_SIGNATURE: &str = "Invalid header signature";
    pub const CRC_MISMATCH: &str = "CRC mismatch";
    pub const UNSUPPORTED_COMPRESSION: &str = "Unsupported compression method";
    pub const ENCRYPTED_ENTRY: &str = "Encrypted entries are not supported";
    pub const NO_ENCRYPTION: &str = "Encryption is not supported";
    pub const UNRECOGNIZED_FORMAT: &str = "Unrecognized archive format";
    pub const UNRECOGNIZED_FILTER: &str = "Unrecognized filter";
    pub const PREMATURE_END: &str = "Premature end of archive";
    pub const BAD_CENTRAL_DIRECTORY: &str = "Invalid central directory";
    pub const BAD_ZIP64: &str = "Invalid ZIP64 extra field";
    pub const BAD_OCTAL: &str = "Invalid octal number in header";
    pub const SIZE_OVERFLOW: &str = "Entry size exceeds archive";
    pub const SEEK_UNSUPPORTED: &str = "Seek not supported for this entry";
    pub const DECOMPRESSION_FAILED: &str = "Decompression failed";
    pub const MISSING_VOLUME: &str = "Multi-volume data continues in missing volume";
}

/// Session-level failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open source {path}: {source}")]
    SourceOpen {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("entry not found: {0}")]
    EntryNotFound(String),

    #[error("invalid virtual URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
