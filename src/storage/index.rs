//! The index file half of a segment (§3, §6): a sequence of fixed-width
//! 24-byte records, one per message, giving the byte position, size, and
//! timestamp of each message in the sibling data file. Record `k` of a
//! segment corresponds to offset `base_offset + k`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::errors::{IndexContext, IndexError};

/// `startAt: u64`, `msgSize: i64`, `timestamp_ns: i64`, little-endian (§6).
pub const RECORD_SIZE: u64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    pub start_at: u64,
    pub msg_size: i64,
    pub timestamp_ns: i64,
}

impl IndexRecord {
    pub fn to_bytes(self) -> [u8; RECORD_SIZE as usize] {
        let mut buf = [0u8; RECORD_SIZE as usize];
        buf[0..8].copy_from_slice(&self.start_at.to_le_bytes());
        buf[8..16].copy_from_slice(&self.msg_size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), RECORD_SIZE as usize);
        IndexRecord {
            start_at: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            msg_size: i64::from_le_bytes(buf[8..16].try_into().unwrap()),
            timestamp_ns: i64::from_le_bytes(buf[16..24].try_into().unwrap()),
        }
    }
}

pub struct Index {
    file: File,
    path: PathBuf,
    len: u64, // number of entries, not bytes
}

impl Index {
    #[instrument(skip_all, fields(path = ?path.as_ref()))]
    pub fn new(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref().to_path_buf();
        debug!("opening index file");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .with_open_context(&path.to_string_lossy())?;

        let mut file_len = file
            .metadata()
            .with_open_context(&path.to_string_lossy())?
            .len();

        if file_len % RECORD_SIZE != 0 {
            let valid_size = (file_len / RECORD_SIZE) * RECORD_SIZE;
            warn!(
                file_size = file_len,
                valid_size, "index file size is not a multiple of the record size, truncating"
            );
            file.set_len(valid_size).with_truncate_context(valid_size / RECORD_SIZE)?;
            file_len = valid_size;
        }

        Ok(Index {
            file,
            path,
            len: file_len / RECORD_SIZE,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size_bytes(&self) -> u64 {
        self.len * RECORD_SIZE
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends records in one contiguous write, per the append algorithm's
    /// step 5 ("write index records in one contiguous write").
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub fn append_records(&mut self, records: &[IndexRecord]) -> Result<(), IndexError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(records.len() * RECORD_SIZE as usize);
        for record in records {
            buf.extend_from_slice(&record.to_bytes());
        }
        self.file
            .seek(SeekFrom::End(0))
            .with_write_context(self.len)?;
        self.file.write_all(&buf).with_write_context(self.len)?;
        self.len += records.len() as u64;
        Ok(())
    }

    pub fn sync(&self) -> Result<(), IndexError> {
        self.file.sync_data().with_sync_context()
    }

    /// Reads a single record at `entry`.
    pub fn read(&self, entry: u64) -> Result<IndexRecord, IndexError> {
        if entry >= self.len {
            return Err(IndexError::EntryNotFound {
                entry,
                len: self.len,
            });
        }
        let mut file = File::open(&self.path).with_open_context(&self.path.to_string_lossy())?;
        file.seek(SeekFrom::Start(entry * RECORD_SIZE))
            .with_read_context(entry)?;
        let mut buf = [0u8; RECORD_SIZE as usize];
        file.read_exact(&mut buf).with_read_context(entry)?;
        Ok(IndexRecord::from_bytes(&buf))
    }

    /// Reads up to `max_count` consecutive records starting at `start_entry`,
    /// stopping at the end of the index (never erroring on a short read —
    /// that's the planner's "fewer than maxBatch at the tail" behavior).
    pub fn read_range(&self, start_entry: u64, max_count: u64) -> Result<Vec<IndexRecord>, IndexError> {
        if start_entry >= self.len || max_count == 0 {
            return Ok(Vec::new());
        }
        let count = max_count.min(self.len - start_entry);
        let mut file = File::open(&self.path).with_open_context(&self.path.to_string_lossy())?;
        file.seek(SeekFrom::Start(start_entry * RECORD_SIZE))
            .with_read_context(start_entry)?;
        let mut buf = vec![0u8; (count * RECORD_SIZE) as usize];
        file.read_exact(&mut buf).with_read_context(start_entry)?;
        Ok(buf
            .chunks_exact(RECORD_SIZE as usize)
            .map(IndexRecord::from_bytes)
            .collect())
    }

    /// Reads every record currently in the index; used by segment recovery.
    pub fn read_all(&self) -> Result<Vec<IndexRecord>, IndexError> {
        self.read_range(0, self.len)
    }

    /// Drops trailing entries down to `new_len`, used by recovery when the
    /// data file is shorter than the index implies.
    pub fn truncate_to(&mut self, new_len: u64) -> Result<(), IndexError> {
        if new_len == self.len {
            return Ok(());
        }
        warn!(current_len = self.len, new_len, "truncating index during recovery");
        self.file
            .set_len(new_len * RECORD_SIZE)
            .with_truncate_context(new_len)?;
        self.len = new_len;
        Ok(())
    }
}
