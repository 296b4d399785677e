//! `Log` is the per-topic handle tying a family of segments together: it
//! owns directory scanning/recovery on open, segment rolling, and the
//! offset bookkeeping described in §3/§4.1.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::config::FsyncPolicy;
use crate::errors::LogError;
use crate::model::{MAX_BATCH_UNBOUNDED, OFFSET_EARLIEST, OFFSET_LATEST};
use crate::storage::segment::{Segment, base_offset_from_data_file_name, data_file_name};

pub struct Log {
    dir: PathBuf,
    segments: Vec<Segment>,
    max_segment_entries: u64,
    max_segment_bytes: Option<u64>,
    fsync_policy: FsyncPolicy,
    /// Tracks the next offset to be assigned independently of `segments`,
    /// since a topic truncated back to nothing still must remember where
    /// production left off (§8 scenario 4: `Offsets` reports `(1, 0)`, not
    /// `(-1, -1)`, after producing one message and truncating it away).
    next_offset: i64,
    batches_since_sync: u32,
}

impl Log {
    #[instrument(skip_all, fields(dir = ?dir.as_ref()))]
    pub fn open(
        dir: impl AsRef<Path>,
        max_segment_entries: u64,
        max_segment_bytes: Option<u64>,
        fsync_policy: FsyncPolicy,
    ) -> Result<Self, LogError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| LogError::Directory {
            path: dir.to_string_lossy().into_owned(),
            source,
        })?;

        let mut base_offsets = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|source| LogError::Directory {
            path: dir.to_string_lossy().into_owned(),
            source,
        })? {
            let entry = entry.map_err(|source| LogError::Directory {
                path: dir.to_string_lossy().into_owned(),
                source,
            })?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(base) = base_offset_from_data_file_name(name) {
                    base_offsets.push(base);
                }
            }
        }
        base_offsets.sort_unstable();

        let mut segments = Vec::with_capacity(base_offsets.len());
        for base in base_offsets {
            segments.push(Segment::open(&dir, base)?);
        }

        let next_offset = segments.last().map(|s| s.next_offset()).unwrap_or(0);

        let mut log = Log {
            dir,
            segments,
            max_segment_entries,
            max_segment_bytes,
            fsync_policy,
            next_offset,
            batches_since_sync: 0,
        };

        if log.segments.is_empty() {
            log.roll_segment()?;
        }

        info!(
            segments = log.segments.len(),
            next_offset = log.next_offset,
            "log opened"
        );

        Ok(log)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// `(min, max)` per §3: `(-1, -1)` for a topic that has never had a
    /// message produced to it; `(next_offset, next_offset - 1)` for one
    /// that was produced to and then truncated entirely empty.
    pub fn offsets(&self) -> (i64, i64) {
        if self.next_offset == 0 {
            return (-1, -1);
        }
        let min = self.segments.first().map(|s| s.base_offset()).unwrap_or(self.next_offset);
        (min, self.next_offset - 1)
    }

    /// Appends one batch, rolling to a fresh segment first if it would
    /// cross a configured bound (§4.1 algorithm: append). A batch that
    /// itself exceeds both bounds is never split — it goes entirely into
    /// whichever segment is active after the roll check.
    #[instrument(skip(self, messages), fields(dir = ?self.dir, count = messages.len()))]
    pub fn append(&mut self, messages: &[Vec<u8>]) -> Result<i64, LogError> {
        let batch_bytes: u64 = messages.iter().map(|m| m.len() as u64).sum();
        let batch_count = messages.len() as u64;

        let needs_roll = match self.segments.last() {
            None => true,
            Some(active) => {
                !active.is_empty()
                    && active.would_exceed(
                        batch_bytes,
                        batch_count,
                        self.max_segment_entries,
                        self.max_segment_bytes,
                    )
            }
        };
        if needs_roll {
            info!("rolling to a new segment before append");
            self.roll_segment()?;
        }

        let active = self.segments.last_mut().expect("segment list is never empty after open/roll");
        let first_offset = active.append_batch(messages, self.fsync_policy, &mut self.batches_since_sync)?;
        self.next_offset = first_offset + messages.len() as i64;

        debug!(first_offset, next_offset = self.next_offset, "log append committed");
        Ok(first_offset)
    }

    /// Resolves sentinels and locates the segment containing `start_offset`,
    /// returning `(data file name, bytePos, sizes[])` (§4.1 algorithm:
    /// planRead).
    pub fn plan_read(&self, start_offset: i64, max_batch: i64) -> Result<(String, u64, Vec<i64>), LogError> {
        if max_batch <= 0 && max_batch != MAX_BATCH_UNBOUNDED {
            return Err(LogError::BadArgument {
                message: format!("maxBatch must be positive or -1, got {max_batch}"),
            });
        }

        let (min, max) = self.offsets();
        let resolved = match start_offset {
            OFFSET_LATEST => max + 1,
            OFFSET_EARLIEST => {
                if min == -1 {
                    max + 1
                } else {
                    min
                }
            }
            other => other,
        };

        if min != -1 && resolved < min {
            return Err(LogError::OffsetOutOfRange {
                offset: resolved,
                min,
                max,
            });
        }

        if resolved > max {
            let filename = self
                .segments
                .last()
                .map(|s| data_file_name(s.base_offset()))
                .unwrap_or_else(|| data_file_name(self.next_offset));
            return Ok((filename, 0, Vec::new()));
        }

        let segment = self.find_segment_for_offset(resolved)?;
        let (byte_pos, sizes) = segment.plan_read(resolved, max_batch)?;
        Ok((data_file_name(segment.base_offset()), byte_pos, sizes))
    }

    /// Used by non-streaming callers and tests that want the bytes
    /// directly rather than a planned `(file, pos, sizes)` triple.
    pub fn read_payload(&self, offset: i64) -> Result<Vec<u8>, LogError> {
        let (min, max) = self.offsets();
        if min == -1 || offset < min || offset > max {
            return Err(LogError::OffsetOutOfRange { offset, min, max });
        }
        let segment = self.find_segment_for_offset(offset)?;
        Ok(segment.read_payload(offset)?)
    }

    /// Drops every whole segment whose last offset is strictly less than
    /// `before_offset`; a segment straddling the boundary is kept in full.
    /// Returns the post-truncation min offset.
    #[instrument(skip(self), fields(dir = ?self.dir, before_offset))]
    pub fn truncate(&mut self, before_offset: i64) -> Result<i64, LogError> {
        let mut kept = Vec::with_capacity(self.segments.len());
        for segment in self.segments.drain(..) {
            let last_offset = segment.next_offset() - 1;
            if last_offset < before_offset {
                info!(base_offset = segment.base_offset(), "dropping truncated segment");
                segment.remove_files().map_err(|source| LogError::Directory {
                    path: segment.data_file_path().to_string_lossy().into_owned(),
                    source,
                })?;
            } else {
                kept.push(segment);
            }
        }
        self.segments = kept;
        let (min, _) = self.offsets();
        Ok(min)
    }

    fn roll_segment(&mut self) -> Result<(), LogError> {
        let base_offset = self.next_offset;
        let segment = Segment::open(&self.dir, base_offset)?;
        self.segments.push(segment);
        Ok(())
    }

    fn find_segment_for_offset(&self, offset: i64) -> Result<&Segment, LogError> {
        let idx = self.segments.partition_point(|s| s.base_offset() <= offset);
        if idx == 0 {
            let (min, max) = self.offsets();
            return Err(LogError::OffsetOutOfRange { offset, min, max });
        }
        Ok(&self.segments[idx - 1])
    }
}
