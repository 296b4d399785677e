//! The data file half of a segment (§3, §4.1): a plain append-only file
//! holding the concatenation of raw message bytes in offset order, with no
//! inline framing — message boundaries live entirely in the index file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::errors::{StorageContext, StorageError};

/// Store is the data-file half of a segment. Appends are sequential;
/// reads open an independent read-only handle per call, matching the
/// "readers open new read-only fds per consume" resource policy (§5).
pub struct Store {
    file: File,
    path: PathBuf,
    size: u64,
}

impl Store {
    #[instrument(skip_all, fields(path = ?path.as_ref()))]
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        debug!("opening store file");

        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&path)
            .with_open_context(&path.to_string_lossy())?;

        let size = file
            .metadata()
            .with_open_context(&path.to_string_lossy())?
            .len();

        Ok(Store { file, path, size })
    }

    /// Appends raw bytes and returns the byte position they start at.
    #[instrument(skip(self, data), fields(data_len = data.len()))]
    pub fn append(&mut self, data: &[u8]) -> Result<u64, StorageError> {
        let pos = self.size;
        self.file.write_all(data).with_write_context(pos)?;
        self.size += data.len() as u64;
        Ok(pos)
    }

    /// Fsyncs the data file. Callers (the segment/log layer) decide when to
    /// call this based on the configured fsync policy; data is always
    /// synced before the corresponding index records per the ordering
    /// guarantee in §4.1.
    pub fn sync(&self) -> Result<(), StorageError> {
        self.file.sync_data().with_sync_context()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads `len` bytes starting at `pos` via a fresh read-only handle.
    pub fn read_range(&self, pos: u64, len: u64) -> Result<Vec<u8>, StorageError> {
        if pos + len > self.size {
            return Err(StorageError::ReadBeyondEnd {
                position: pos,
                len,
                size: self.size,
            });
        }
        let mut file = File::open(&self.path).with_open_context(&self.path.to_string_lossy())?;
        file.seek(SeekFrom::Start(pos)).with_read_context(pos)?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).with_read_context(pos)?;
        Ok(buf)
    }

    /// Opens an independent read-only handle, for callers (the transport
    /// layer) that want to stream a byte range without buffering it
    /// through this process's storage-layer buffers.
    pub fn open_read_handle(&self) -> Result<File, StorageError> {
        File::open(&self.path).with_open_context(&self.path.to_string_lossy())
    }

    /// Used by recovery (§4.1) to discard a torn tail after the index has
    /// been trimmed to only the records whose payload is actually present.
    pub fn truncate_to(&mut self, new_size: u64) -> Result<(), StorageError> {
        if new_size == self.size {
            return Ok(());
        }
        warn!(
            current_size = self.size,
            new_size, "truncating store file during recovery"
        );
        self.file
            .set_len(new_size)
            .with_truncate_context(new_size)?;
        self.size = new_size;
        // append-mode handles track their own write cursor from file length;
        // reposition explicitly so the next append lands at the new end.
        self.file
            .seek(SeekFrom::Start(new_size))
            .with_truncate_context(new_size)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_and_read_range() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::new(dir.path().join("0.hrq")).unwrap();

        let p1 = store.append(b"hello").unwrap();
        let p2 = store.append(b"world!").unwrap();

        assert_eq!(p1, 0);
        assert_eq!(p2, 5);
        assert_eq!(store.size(), 11);

        assert_eq!(store.read_range(0, 5).unwrap(), b"hello");
        assert_eq!(store.read_range(5, 6).unwrap(), b"world!");
        assert_eq!(store.read_range(0, 11).unwrap(), b"helloworld!");
    }

    #[test]
    fn read_beyond_end_errors() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::new(dir.path().join("0.hrq")).unwrap();
        store.append(b"abc").unwrap();
        assert!(matches!(
            store.read_range(0, 10),
            Err(StorageError::ReadBeyondEnd { .. })
        ));
    }

    #[test]
    fn truncate_discards_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0.hrq");
        let mut store = Store::new(&path).unwrap();
        store.append(b"hello").unwrap();
        store.append(b"garbage").unwrap();
        store.truncate_to(5).unwrap();
        assert_eq!(store.size(), 5);
        assert_eq!(store.read_range(0, 5).unwrap(), b"hello");

        // reopening must observe the truncated size
        let reopened = Store::new(&path).unwrap();
        assert_eq!(reopened.size(), 5);
    }

    #[test]
    fn zero_length_append_is_a_noop_write() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::new(dir.path().join("0.hrq")).unwrap();
        let pos = store.append(b"").unwrap();
        assert_eq!(pos, 0);
        assert_eq!(store.size(), 0);
    }
}
