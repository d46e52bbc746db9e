//! The append-only journal trait and an in-memory implementation.
//!
//! Record framing on durable media (little-endian):
//!
//! ```text
//! [4 bytes: len][4 bytes: seq][8 bytes: ts_us][1 byte: kind]
//! [N bytes: JSON payload][4 bytes: CRC32]
//! ```
//!
//! `len` counts every byte after itself (seq + ts + kind + payload + CRC).
//! The CRC covers seq ‖ ts ‖ kind ‖ payload.

use super::error::JournalError;
use super::types::{EventPayload, EventRecord};
use std::sync::Mutex;

/// Fixed bytes after the length prefix, excluding the payload:
/// seq (4) + ts (8) + kind (1) + CRC (4).
pub const RECORD_FIXED: usize = 4 + 8 + 1 + 4;

/// Size of the length prefix itself.
pub const RECORD_LEN_PREFIX: usize = 4;

/// Iterator over journal records, yielding decode errors in place.
pub type JournalReadIter = Box<dyn Iterator<Item = Result<EventRecord, JournalError>> + Send>;

/// An append-only, sequence-assigning event journal.
///
/// Appending assigns the next monotonic sequence number and must make the
/// record durable according to the implementation's commit policy (group
/// commit for the file journal; immediate for the in-memory one).
/// Single-writer usage is intended: the matching thread appends, replay and
/// monitoring read concurrently.
pub trait Journal: Send + Sync {
    /// Append a record; returns the assigned sequence number.
    fn append(&self, payload: &EventPayload, ts_us: u64) -> Result<u64, JournalError>;

    /// Read records with `seq >= from_seq` in sequence order.
    fn read_from(&self, from_seq: u64) -> Result<JournalReadIter, JournalError>;

    /// Sequence number of the last appended record, if any.
    fn last_sequence(&self) -> Option<u64>;

    /// Force all buffered records to durable storage.
    fn flush(&self) -> Result<(), JournalError>;

    /// Verify the integrity of every stored record.
    fn verify_integrity(&self) -> Result<(), JournalError>;
}

/// Frame a record for durable storage.
#[must_use]
pub fn encode_record(seq: u64, ts_us: u64, payload_kind: u8, payload_json: &[u8]) -> Vec<u8> {
    let body_len = RECORD_FIXED + payload_json.len();
    let mut buf = Vec::with_capacity(RECORD_LEN_PREFIX + body_len);
    buf.extend_from_slice(&(body_len as u32).to_le_bytes());
    buf.extend_from_slice(&(seq as u32).to_le_bytes());
    buf.extend_from_slice(&ts_us.to_le_bytes());
    buf.push(payload_kind);
    buf.extend_from_slice(payload_json);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[RECORD_LEN_PREFIX..]);
    let crc = hasher.finalize();
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Decode one record at `offset` within `bytes`.
///
/// Returns `Ok(None)` on a zero length prefix (end of written data in a
/// pre-allocated segment) and the record plus its total framed size
/// otherwise.
pub fn decode_record(
    bytes: &[u8],
    offset: usize,
) -> Result<Option<(EventRecord, usize)>, JournalError> {
    if offset + RECORD_LEN_PREFIX > bytes.len() {
        return Ok(None);
    }
    let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("4 bytes")) as usize;
    if len == 0 {
        return Ok(None);
    }
    if len < RECORD_FIXED {
        return Err(JournalError::InvalidHeader {
            offset,
            message: format!("record length {len} below fixed overhead"),
        });
    }
    let body_start = offset + RECORD_LEN_PREFIX;
    let body_end = body_start + len;
    if body_end > bytes.len() {
        return Err(JournalError::InvalidHeader {
            offset,
            message: format!("record length {len} runs past segment end"),
        });
    }
    let body = &bytes[body_start..body_end];
    let seq = u32::from_le_bytes(body[0..4].try_into().expect("4 bytes")) as u64;
    let ts_us = u64::from_le_bytes(body[4..12].try_into().expect("8 bytes"));
    let payload_json = &body[12..len - 4];
    let stored_crc = u32::from_le_bytes(body[len - 4..].try_into().expect("4 bytes"));

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&body[..len - 4]);
    let actual_crc = hasher.finalize();
    if actual_crc != stored_crc {
        return Err(JournalError::CorruptRecord {
            sequence: seq,
            expected_crc: stored_crc,
            actual_crc,
        });
    }

    let payload: EventPayload =
        serde_json::from_slice(payload_json).map_err(|e| JournalError::Deserialization {
            sequence: seq,
            message: e.to_string(),
        })?;

    Ok(Some((
        EventRecord { seq, ts_us, payload },
        RECORD_LEN_PREFIX + len,
    )))
}

/// In-memory journal for tests and embedders that do their own persistence.
///
/// Durability is trivially immediate; `flush` is a no-op.
pub struct MemoryJournal {
    records: Mutex<Vec<EventRecord>>,
}

impl MemoryJournal {
    /// Create an empty in-memory journal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl Journal for MemoryJournal {
    fn append(&self, payload: &EventPayload, ts_us: u64) -> Result<u64, JournalError> {
        let mut records = self.records.lock().map_err(|_| JournalError::MutexPoisoned)?;
        let seq = records.len() as u64;
        records.push(EventRecord {
            seq,
            ts_us,
            payload: payload.clone(),
        });
        Ok(seq)
    }

    fn read_from(&self, from_seq: u64) -> Result<JournalReadIter, JournalError> {
        let records = self.records.lock().map_err(|_| JournalError::MutexPoisoned)?;
        let tail: Vec<EventRecord> = records
            .iter()
            .filter(|r| r.seq >= from_seq)
            .cloned()
            .collect();
        Ok(Box::new(tail.into_iter().map(Ok)))
    }

    fn last_sequence(&self) -> Option<u64> {
        self.records
            .lock()
            .ok()
            .and_then(|r| r.last().map(|rec| rec.seq))
    }

    fn flush(&self) -> Result<(), JournalError> {
        Ok(())
    }

    fn verify_integrity(&self) -> Result<(), JournalError> {
        Ok(())
    }
}
