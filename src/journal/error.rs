//! Error type for the journal subsystem.

use std::path::PathBuf;
use thiserror::Error;

/// Failure modes of the append-only event journal.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JournalError {
    /// An I/O error while reading or writing journal files.
    #[error("journal I/O error{}: {message}", path.as_ref().map(|p| format!(" at {}", p.display())).unwrap_or_default())]
    Io {
        /// The underlying I/O error message.
        message: String,
        /// The file path involved, if known.
        path: Option<PathBuf>,
    },

    /// A record failed CRC32 verification.
    #[error("corrupt journal record at sequence {sequence}: expected CRC {expected_crc:#010x}, got {actual_crc:#010x}")]
    CorruptRecord {
        /// Sequence number of the corrupt record.
        sequence: u64,
        /// CRC stored on disk.
        expected_crc: u32,
        /// CRC recomputed from the record bytes.
        actual_crc: u32,
    },

    /// A record payload could not be deserialized.
    #[error("journal deserialization error at sequence {sequence}: {message}")]
    Deserialization {
        /// Sequence number of the bad record.
        sequence: u64,
        /// Underlying serde error message.
        message: String,
    },

    /// A record payload could not be serialized for writing.
    #[error("journal serialization error: {message}")]
    Serialization {
        /// Underlying serde error message.
        message: String,
    },

    /// The record does not fit in a fresh segment.
    #[error("journal record too large: {record_bytes} bytes exceeds segment size {segment_size}")]
    RecordTooLarge {
        /// Size of the framed record.
        record_bytes: usize,
        /// Configured segment capacity.
        segment_size: usize,
    },

    /// A record header was truncated or malformed.
    #[error("invalid journal record header at offset {offset}: {message}")]
    InvalidHeader {
        /// Byte offset within the segment.
        offset: usize,
        /// Description of the problem.
        message: String,
    },

    /// An internal mutex was poisoned.
    #[error("journal internal mutex poisoned")]
    MutexPoisoned,
}

impl From<std::io::Error> for JournalError {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        JournalError::Io {
            message: err.to_string(),
            path: None,
        }
    }
}
