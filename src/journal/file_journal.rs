//! Memory-mapped, segment-rotating file journal with group commit.
//!
//! Records are framed as described in [`super::journal`] and written into
//! pre-allocated, memory-mapped segment files named
//! `segment-{start_sequence:020}.journal`. Durability is group-committed:
//! the written range is flushed to disk every `flush_every` records and on
//! [`Journal::flush`], which `graceful_shutdown` calls before returning.

use super::error::JournalError;
use super::journal::{Journal, JournalReadIter, decode_record, encode_record};
use super::types::{EventPayload, EventRecord};
use memmap2::MmapMut;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, trace};

/// Default segment size: 64 MB.
const DEFAULT_SEGMENT_SIZE: usize = 64 * 1024 * 1024;

/// Default group-commit batch size.
const DEFAULT_FLUSH_EVERY: u32 = 64;

struct SegmentWriter {
    mmap: MmapMut,
    write_pos: usize,
    capacity: usize,
    path: PathBuf,
}

impl SegmentWriter {
    fn create(path: &Path, capacity: usize) -> Result<Self, JournalError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(path.to_path_buf()),
            })?;
        file.set_len(capacity as u64).map_err(|e| JournalError::Io {
            message: e.to_string(),
            path: Some(path.to_path_buf()),
        })?;
        // SAFETY: the segment file is exclusively owned by this process and
        // is not truncated or remapped while the mmap is live.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(path.to_path_buf()),
            })?
        };
        Ok(Self {
            mmap,
            write_pos: 0,
            capacity,
            path: path.to_path_buf(),
        })
    }

    fn open_existing(path: &Path) -> Result<(Self, Option<u64>), JournalError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(path.to_path_buf()),
            })?;
        let capacity = file
            .metadata()
            .map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(path.to_path_buf()),
            })?
            .len() as usize;
        // SAFETY: as in `create`; this process is the only writer.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(path.to_path_buf()),
            })?
        };
        // Scan to the end of the last valid record.
        let mut pos = 0usize;
        let mut last_seq = None;
        while let Some((record, consumed)) = decode_record(&mmap, pos)? {
            last_seq = Some(record.seq);
            pos += consumed;
        }
        Ok((
            Self {
                mmap,
                write_pos: pos,
                capacity,
                path: path.to_path_buf(),
            },
            last_seq,
        ))
    }

    fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.write_pos)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, JournalError> {
        let start = self.write_pos;
        let end = start + bytes.len();
        if end > self.capacity {
            return Err(JournalError::RecordTooLarge {
                record_bytes: bytes.len(),
                segment_size: self.capacity,
            });
        }
        self.mmap[start..end].copy_from_slice(bytes);
        self.write_pos = end;
        Ok(start)
    }

    fn flush_range(&self, start: usize, len: usize) -> Result<(), JournalError> {
        self.mmap
            .flush_range(start, len)
            .map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(self.path.clone()),
            })
    }
}

struct FileJournalInner {
    writer: SegmentWriter,
    next_seq: u64,
    /// Records written since the last flush.
    unflushed: u32,
    /// Byte offset where the unflushed range begins.
    unflushed_start: usize,
}

/// Memory-mapped file journal (see module docs).
pub struct FileJournal {
    dir: PathBuf,
    segment_size: usize,
    flush_every: u32,
    inner: Mutex<FileJournalInner>,
}

impl FileJournal {
    /// Open or create a journal in `dir` with default segment size and
    /// group-commit batch.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, JournalError> {
        Self::open_with(dir, DEFAULT_SEGMENT_SIZE, DEFAULT_FLUSH_EVERY)
    }

    /// Open or create a journal with explicit segment size and flush batch.
    ///
    /// When the directory already holds segments, appending resumes after
    /// the last valid record of the newest segment.
    pub fn open_with<P: AsRef<Path>>(
        dir: P,
        segment_size: usize,
        flush_every: u32,
    ) -> Result<Self, JournalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| JournalError::Io {
            message: e.to_string(),
            path: Some(dir.clone()),
        })?;

        let mut segments = list_segments(&dir)?;
        segments.sort_unstable();

        let (writer, next_seq) = if let Some(latest) = segments.last() {
            let (writer, last_seq) = SegmentWriter::open_existing(&segment_path(&dir, *latest))?;
            let next = last_seq.map_or(*latest, |s| s + 1);
            (writer, next)
        } else {
            (SegmentWriter::create(&segment_path(&dir, 0), segment_size)?, 0)
        };
        info!(dir = %dir.display(), next_seq, "journal opened");

        Ok(Self {
            dir,
            segment_size,
            flush_every: flush_every.max(1),
            inner: Mutex::new(FileJournalInner {
                unflushed_start: writer.write_pos,
                writer,
                next_seq,
                unflushed: 0,
            }),
        })
    }

    fn rotate(&self, inner: &mut FileJournalInner) -> Result<(), JournalError> {
        let pending = inner.writer.write_pos - inner.unflushed_start;
        if pending > 0 {
            inner.writer.flush_range(inner.unflushed_start, pending)?;
        }
        let new_path = segment_path(&self.dir, inner.next_seq);
        let new_writer = SegmentWriter::create(&new_path, self.segment_size)?;
        trace!(path = %new_path.display(), "journal segment rotated");
        inner.writer = new_writer;
        inner.unflushed = 0;
        inner.unflushed_start = 0;
        Ok(())
    }
}

impl Journal for FileJournal {
    fn append(&self, payload: &EventPayload, ts_us: u64) -> Result<u64, JournalError> {
        let json = serde_json::to_vec(payload).map_err(|e| JournalError::Serialization {
            message: e.to_string(),
        })?;
        let mut inner = self.inner.lock().map_err(|_| JournalError::MutexPoisoned)?;
        let seq = inner.next_seq;
        let frame = encode_record(seq, ts_us, payload.kind() as u8, &json);

        if frame.len() > inner.writer.remaining() {
            self.rotate(&mut inner)?;
        }
        inner.writer.write(&frame)?;
        inner.next_seq += 1;
        inner.unflushed += 1;
        if inner.unflushed >= self.flush_every {
            let start = inner.unflushed_start;
            let len = inner.writer.write_pos - start;
            inner.writer.flush_range(start, len)?;
            inner.unflushed = 0;
            inner.unflushed_start = inner.writer.write_pos;
        }
        Ok(seq)
    }

    fn read_from(&self, from_seq: u64) -> Result<JournalReadIter, JournalError> {
        // Make buffered records visible to the read path first.
        self.flush()?;
        let mut segments = list_segments(&self.dir)?;
        segments.sort_unstable();
        let dir = self.dir.clone();
        Ok(Box::new(SegmentReadIter {
            dir,
            segments,
            segment_idx: 0,
            bytes: Vec::new(),
            offset: 0,
            loaded: false,
            from_seq,
        }))
    }

    fn last_sequence(&self) -> Option<u64> {
        let inner = self.inner.lock().ok()?;
        (inner.next_seq > 0).then(|| inner.next_seq - 1)
    }

    fn flush(&self) -> Result<(), JournalError> {
        let mut inner = self.inner.lock().map_err(|_| JournalError::MutexPoisoned)?;
        if inner.unflushed > 0 {
            let start = inner.unflushed_start;
            let len = inner.writer.write_pos - start;
            inner.writer.flush_range(start, len)?;
            inner.unflushed = 0;
            inner.unflushed_start = inner.writer.write_pos;
        }
        Ok(())
    }

    fn verify_integrity(&self) -> Result<(), JournalError> {
        for record in self.read_from(0)? {
            record?;
        }
        Ok(())
    }
}

struct SegmentReadIter {
    dir: PathBuf,
    segments: Vec<u64>,
    segment_idx: usize,
    bytes: Vec<u8>,
    offset: usize,
    loaded: bool,
    from_seq: u64,
}

impl Iterator for SegmentReadIter {
    type Item = Result<EventRecord, JournalError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !self.loaded {
                let start = *self.segments.get(self.segment_idx)?;
                match fs::read(segment_path(&self.dir, start)) {
                    Ok(bytes) => {
                        self.bytes = bytes;
                        self.offset = 0;
                        self.loaded = true;
                    }
                    Err(e) => {
                        self.segment_idx += 1;
                        return Some(Err(JournalError::from(e)));
                    }
                }
            }
            match decode_record(&self.bytes, self.offset) {
                Ok(Some((record, consumed))) => {
                    self.offset += consumed;
                    if record.seq >= self.from_seq {
                        return Some(Ok(record));
                    }
                }
                Ok(None) => {
                    self.segment_idx += 1;
                    self.loaded = false;
                }
                Err(e) => {
                    // Skip the rest of the damaged segment after reporting.
                    self.segment_idx += 1;
                    self.loaded = false;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn segment_path(dir: &Path, start_seq: u64) -> PathBuf {
    dir.join(format!("segment-{start_seq:020}.journal"))
}

fn list_segments(dir: &Path) -> Result<Vec<u64>, JournalError> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| JournalError::Io {
        message: e.to_string(),
        path: Some(dir.to_path_buf()),
    })? {
        let entry = entry.map_err(JournalError::from)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(start) = name
            .strip_prefix("segment-")
            .and_then(|rest| rest.strip_suffix(".journal"))
        {
            if let Ok(seq) = start.parse::<u64>() {
                segments.push(seq);
            }
        }
    }
    Ok(segments)
}
