//! A segment pairs a data file and an index file covering a contiguous
//! offset range within a topic (§3, §4.1). `Log` owns a family of these and
//! routes reads/writes to whichever one is active or contains a given
//! offset.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, instrument, warn};

use crate::config::FsyncPolicy;
use crate::errors::SegmentError;
use crate::model::MAX_BATCH_UNBOUNDED;
use crate::storage::index::{Index, IndexRecord};
use crate::storage::store::Store;
use crate::storage::traits::{LocalFileSystem, StorageCleanup};

pub const DATA_FILE_SUFFIX: &str = "hrq";
pub const INDEX_FILE_SUFFIX: &str = "dat";

pub fn data_file_name(base_offset: i64) -> String {
    format!("{base_offset:020}.{DATA_FILE_SUFFIX}")
}

pub fn index_file_name(base_offset: i64) -> String {
    format!("{base_offset:020}.{INDEX_FILE_SUFFIX}")
}

/// Parses a segment's base offset from a data-file name, if it has one.
pub fn base_offset_from_data_file_name(name: &str) -> Option<i64> {
    name.strip_suffix(&format!(".{DATA_FILE_SUFFIX}"))
        .and_then(|stem| stem.parse().ok())
}

fn now_unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_nanos() as i64
}

pub struct Segment {
    store: Store,
    index: Index,
    base_offset: i64,
}

impl Segment {
    /// Opens (creating if absent) the segment rooted at `base_offset` in
    /// `dir`, running the recovery-on-open algorithm from §4.1.
    #[instrument(skip(dir), fields(base_offset))]
    pub fn open(dir: impl AsRef<Path>, base_offset: i64) -> Result<Self, SegmentError> {
        let dir = dir.as_ref();
        let store_path = dir.join(data_file_name(base_offset));
        let index_path = dir.join(index_file_name(base_offset));

        let mut store = Store::new(&store_path)?;
        let mut index = Index::new(&index_path)?;

        recover(&mut store, &mut index)?;

        info!(
            base_offset,
            store_size = store.size(),
            index_entries = index.len(),
            "segment opened"
        );

        Ok(Segment {
            store,
            index,
            base_offset,
        })
    }

    pub fn base_offset(&self) -> i64 {
        self.base_offset
    }

    /// The offset that would be assigned to the next appended message.
    pub fn next_offset(&self) -> i64 {
        self.base_offset + self.index.len() as i64
    }

    pub fn entry_count(&self) -> u64 {
        self.index.len()
    }

    pub fn store_bytes(&self) -> u64 {
        self.store.size()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains_offset(&self, offset: i64) -> bool {
        offset >= self.base_offset && offset < self.next_offset()
    }

    /// Whether appending a batch with these totals would cross either
    /// configured roll threshold (§4.1 step 2); used by `Log` to decide
    /// whether to roll *before* writing.
    pub fn would_exceed(&self, batch_bytes: u64, batch_count: u64, max_entries: u64, max_bytes: Option<u64>) -> bool {
        let over_entries = self.index.len() + batch_count > max_entries;
        let over_bytes = max_bytes.is_some_and(|max| self.store.size() + batch_bytes > max);
        over_entries || over_bytes
    }

    /// Appends `messages` as one batch, observing the ordering guarantee
    /// that data bytes are synced before the index records that describe
    /// them (§4.1 step 4-5). `batches_since_sync` tracks state for the
    /// `PerNBatches` policy across calls and is reset whenever a sync
    /// actually happens.
    #[instrument(skip(self, messages, batches_since_sync), fields(base_offset = self.base_offset, count = messages.len()))]
    pub fn append_batch(
        &mut self,
        messages: &[Vec<u8>],
        fsync_policy: FsyncPolicy,
        batches_since_sync: &mut u32,
    ) -> Result<i64, SegmentError> {
        let first_offset = self.next_offset();

        let mut positions = Vec::with_capacity(messages.len());
        for msg in messages {
            let pos = self.store.append(msg)?;
            positions.push(pos);
        }

        let should_sync = match fsync_policy {
            FsyncPolicy::PerBatch => true,
            FsyncPolicy::Never => false,
            FsyncPolicy::PerNBatches(n) => {
                *batches_since_sync += 1;
                if *batches_since_sync >= n.max(1) {
                    *batches_since_sync = 0;
                    true
                } else {
                    false
                }
            }
        };
        if should_sync {
            self.store.sync()?;
        }

        let timestamp_ns = now_unix_nanos();
        let records: Vec<IndexRecord> = messages
            .iter()
            .zip(positions)
            .map(|(msg, start_at)| IndexRecord {
                start_at,
                msg_size: msg.len() as i64,
                timestamp_ns,
            })
            .collect();
        self.index.append_records(&records)?;
        if should_sync {
            self.index.sync()?;
        }

        debug!(first_offset, count = records.len(), "batch appended to segment");
        Ok(first_offset)
    }

    /// Returns `(bytePos, sizes[])` for up to `max_batch` messages starting
    /// at `start_offset`, which must already be resolved and within (or one
    /// past the end of) this segment (§4.1 planRead).
    pub fn plan_read(&self, start_offset: i64, max_batch: i64) -> Result<(u64, Vec<i64>), SegmentError> {
        let start_entry = (start_offset - self.base_offset) as u64;
        if start_entry >= self.index.len() {
            return Ok((self.store.size(), Vec::new()));
        }

        let limit = if max_batch == MAX_BATCH_UNBOUNDED {
            self.index.len() - start_entry
        } else {
            max_batch as u64
        };

        let records = self.index.read_range(start_entry, limit)?;
        let byte_pos = records.first().map(|r| r.start_at).unwrap_or_else(|| self.store.size());
        let sizes = records.iter().map(|r| r.msg_size).collect();
        Ok((byte_pos, sizes))
    }

    /// Reads the raw payload bytes for a single offset, used by callers
    /// that need the bytes directly (tests, the non-streaming consume path).
    pub fn read_payload(&self, offset: i64) -> Result<Vec<u8>, SegmentError> {
        let entry = (offset - self.base_offset) as u64;
        let record = self.index.read(entry)?;
        Ok(self.store.read_range(record.start_at, record.msg_size as u64)?)
    }

    pub fn data_file_path(&self) -> &Path {
        self.store.path()
    }

    pub fn index_file_path(&self) -> &Path {
        self.index.path()
    }

    /// Removes the segment's two files from disk; used by `Log::truncate`
    /// when dropping whole segments.
    pub fn remove_files(&self) -> std::io::Result<()> {
        LocalFileSystem.cleanup_segment(self.store.path(), self.index.path())
    }
}

/// Recovery-on-open (§4.1): reconciles a torn tail between the data file
/// and the index file, whichever direction the discrepancy runs.
fn recover(store: &mut Store, index: &mut Index) -> Result<(), SegmentError> {
    let records = index.read_all()?;
    let data_len = store.size();
    let expected: u64 = records.iter().map(|r| r.msg_size.max(0) as u64).sum();

    if data_len > expected {
        warn!(data_len, expected, "data file longer than index implies, truncating orphaned payload");
        store.truncate_to(expected)?;
    } else if data_len < expected {
        let mut sum: u64 = 0;
        let mut keep = 0usize;
        for record in &records {
            let next_sum = sum + record.msg_size.max(0) as u64;
            if next_sum > data_len {
                break;
            }
            sum = next_sum;
            keep += 1;
        }
        warn!(
            data_len,
            expected,
            kept_records = keep,
            dropped_records = records.len() - keep,
            "index implies more data than is present, dropping trailing records"
        );
        index.truncate_to(keep as u64)?;
        store.truncate_to(sum)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn messages(strs: &[&str]) -> Vec<Vec<u8>> {
        strs.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 0).unwrap();
        let mut since_sync = 0;

        let first = segment
            .append_batch(&messages(&["hello", "world"]), FsyncPolicy::PerBatch, &mut since_sync)
            .unwrap();

        assert_eq!(first, 0);
        assert_eq!(segment.next_offset(), 2);
        assert_eq!(segment.read_payload(0).unwrap(), b"hello");
        assert_eq!(segment.read_payload(1).unwrap(), b"world");
    }

    #[test]
    fn sequential_offsets_from_nonzero_base() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 100).unwrap();
        let mut since_sync = 0;

        let first = segment
            .append_batch(&messages(&["a", "b", "c"]), FsyncPolicy::PerBatch, &mut since_sync)
            .unwrap();
        assert_eq!(first, 100);
        assert_eq!(segment.next_offset(), 103);
        assert_eq!(segment.read_payload(102).unwrap(), b"c");
    }

    #[test]
    fn plan_read_stops_at_segment_end() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 0).unwrap();
        let mut since_sync = 0;
        segment
            .append_batch(&messages(&["a", "b", "c", "d", "e"]), FsyncPolicy::PerBatch, &mut since_sync)
            .unwrap();

        let (pos, sizes) = segment.plan_read(3, 10).unwrap();
        assert_eq!(pos, 3);
        assert_eq!(sizes, vec![1, 1]);
    }

    #[test]
    fn plan_read_past_end_is_empty_not_error() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 0).unwrap();
        let mut since_sync = 0;
        segment
            .append_batch(&messages(&["a"]), FsyncPolicy::PerBatch, &mut since_sync)
            .unwrap();

        let (_, sizes) = segment.plan_read(1, 10).unwrap();
        assert!(sizes.is_empty());
    }

    #[test]
    fn recovery_truncates_orphaned_data_tail() {
        let dir = TempDir::new().unwrap();
        let base = 0;
        {
            let mut segment = Segment::open(dir.path(), base).unwrap();
            let mut since_sync = 0;
            segment
                .append_batch(&messages(&["hello"]), FsyncPolicy::PerBatch, &mut since_sync)
                .unwrap();
        }
        // simulate a crash that left extra bytes in the data file but no
        // matching index record
        {
            use std::fs::OpenOptions;
            use std::io::Write;
            let path = dir.path().join(data_file_name(base));
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"garbage").unwrap();
        }

        let segment = Segment::open(dir.path(), base).unwrap();
        assert_eq!(segment.next_offset(), 1);
        assert_eq!(segment.store_bytes(), 5);
    }

    #[test]
    fn recovery_drops_index_records_beyond_data_file() {
        let dir = TempDir::new().unwrap();
        let base = 0;
        {
            let mut segment = Segment::open(dir.path(), base).unwrap();
            let mut since_sync = 0;
            segment
                .append_batch(&messages(&["aa", "bb"]), FsyncPolicy::PerBatch, &mut since_sync)
                .unwrap();
        }
        // truncate the data file out from under the index, simulating a
        // crash between the data write and the index write
        {
            use std::fs::OpenOptions;
            let path = dir.path().join(data_file_name(base));
            let file = OpenOptions::new().write(true).open(&path).unwrap();
            file.set_len(2).unwrap();
        }

        let segment = Segment::open(dir.path(), base).unwrap();
        assert_eq!(segment.next_offset(), 1);
        assert_eq!(segment.store_bytes(), 2);
        assert_eq!(segment.read_payload(0).unwrap(), b"aa");
    }

    #[test]
    fn zero_length_message_gets_one_index_record() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 0).unwrap();
        let mut since_sync = 0;
        segment
            .append_batch(&messages(&[""]), FsyncPolicy::PerBatch, &mut since_sync)
            .unwrap();
        assert_eq!(segment.entry_count(), 1);
        assert_eq!(segment.read_payload(0).unwrap(), b"");
    }
}
