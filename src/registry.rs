//! The Topic Registry (§4.2): maps topic names to Log Segment Store
//! handles, serializing topic lifecycle operations behind a single
//! concurrent map.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::config::{BrokerConfig, FsyncPolicy};
use crate::errors::{BrokerError, LogError};
use crate::model::validate_topic_name;
use crate::storage::log::Log;
use crate::storage::traits::{LocalFileSystem, StorageCleanup};

/// A refcounted handle to one topic's `Log`. Cloning an `Arc<TopicHandle>`
/// is how produce/consume operations keep a topic alive past a concurrent
/// delete (§3 Ownership, §9 "cyclic handle ownership"): `delete` tombstones
/// the handle rather than closing it immediately, and `Drop` performs the
/// actual directory removal once the last holder departs.
pub struct TopicHandle {
    topic: String,
    log: Mutex<Log>,
    tombstoned: AtomicBool,
}

impl TopicHandle {
    /// Attaches this handle's topic name to a `LogError`, producing the
    /// top-level Kind the dispatcher and wire-code table expect instead of
    /// a bare wrapped error.
    fn translate(&self, error: LogError) -> BrokerError {
        match error {
            LogError::OffsetOutOfRange { offset, min, .. } => BrokerError::OffsetOutOfRange {
                topic: self.topic.clone(),
                offset,
                min,
            },
            LogError::BadArgument { message } => BrokerError::BadArgument { message },
            other => BrokerError::Log(other),
        }
    }

    pub fn append(&self, messages: &[Vec<u8>]) -> Result<i64, BrokerError> {
        let mut log = self.log.lock().expect("topic log mutex poisoned");
        log.append(messages).map_err(|e| self.translate(e))
    }

    pub fn plan_read(&self, start_offset: i64, max_batch: i64) -> Result<(String, u64, Vec<i64>), BrokerError> {
        let log = self.log.lock().expect("topic log mutex poisoned");
        log.plan_read(start_offset, max_batch).map_err(|e| self.translate(e))
    }

    pub fn read_payload(&self, offset: i64) -> Result<Vec<u8>, BrokerError> {
        let log = self.log.lock().expect("topic log mutex poisoned");
        log.read_payload(offset).map_err(|e| self.translate(e))
    }

    pub fn offsets(&self) -> (i64, i64) {
        let log = self.log.lock().expect("topic log mutex poisoned");
        log.offsets()
    }

    pub fn truncate(&self, before_offset: i64) -> Result<i64, BrokerError> {
        let mut log = self.log.lock().expect("topic log mutex poisoned");
        log.truncate(before_offset).map_err(|e| self.translate(e))
    }

    pub fn dir(&self) -> PathBuf {
        let log = self.log.lock().expect("topic log mutex poisoned");
        log.dir().to_path_buf()
    }

    pub fn segment_count(&self) -> usize {
        let log = self.log.lock().expect("topic log mutex poisoned");
        log.segment_count()
    }

    pub fn is_tombstoned(&self) -> bool {
        self.tombstoned.load(Ordering::SeqCst)
    }
}

impl Drop for TopicHandle {
    fn drop(&mut self) {
        if !self.tombstoned.load(Ordering::SeqCst) {
            return;
        }
        let dir = match self.log.lock() {
            Ok(log) => log.dir().to_path_buf(),
            Err(_) => return,
        };
        if let Err(error) = LocalFileSystem.cleanup_log_directory(&dir) {
            warn!(dir = ?dir, %error, "failed to remove tombstoned topic directory");
        } else {
            info!(dir = ?dir, "tombstoned topic directory removed");
        }
    }
}

/// A registry map entry is either a live handle or a marker that the topic
/// was deleted while a handle was still in use. Keeping the marker around
/// (instead of removing the map entry in `delete`) is what stops `get`/
/// `create` from falling through to `existing_topic_dir` and reopening a
/// fresh handle onto a directory that a lingering handle still owns
/// (§4.2: "a handle is closed when its refcount reaches zero AND the topic
/// is deleted").
enum Slot {
    Live(Arc<TopicHandle>),
    Tombstoned,
}

pub struct Registry {
    root_dirs: Vec<PathBuf>,
    max_segment_entries: u64,
    max_segment_bytes: Option<u64>,
    fsync_policy: FsyncPolicy,
    topics: DashMap<String, Slot>,
}

impl Registry {
    pub fn new(config: &BrokerConfig) -> Self {
        Registry {
            root_dirs: config.root_dirs.clone(),
            max_segment_entries: config.max_segment_entries,
            max_segment_bytes: config.max_segment_bytes,
            fsync_policy: config.fsync_policy,
            topics: DashMap::new(),
        }
    }

    fn primary_root(&self) -> &Path {
        &self.root_dirs[0]
    }

    /// The root directory an existing topic's files live under, checking
    /// each configured root in order (§6 `root_dirs`: "topics are created
    /// in the first, reads fall through to later ones").
    fn existing_topic_dir(&self, topic: &str) -> Option<PathBuf> {
        self.root_dirs
            .iter()
            .map(|root| root.join(topic))
            .find(|dir| dir.is_dir())
    }

    /// Drops a tombstoned map entry whose directory is already gone, so a
    /// later `create` of the same name doesn't see a permanently stuck
    /// marker. Safe to call speculatively: a no-op if the entry is live, or
    /// if the tombstoned directory is still being held open elsewhere.
    fn reap_if_tombstoned_and_gone(&self, topic: &str) {
        if let Some(slot) = self.topics.get(topic) {
            let gone = matches!(slot.value(), Slot::Tombstoned) && self.existing_topic_dir(topic).is_none();
            drop(slot);
            if gone {
                self.topics.remove(topic);
            }
        }
    }

    #[instrument(skip(self))]
    pub fn create(&self, topic: &str) -> Result<(), BrokerError> {
        validate_topic_name(topic)?;
        self.reap_if_tombstoned_and_gone(topic);

        match self.topics.entry(topic.to_string()) {
            Entry::Occupied(_) => Err(BrokerError::TopicAlreadyExists {
                topic: topic.to_string(),
            }),
            Entry::Vacant(entry) => {
                if self.existing_topic_dir(topic).is_some() {
                    return Err(BrokerError::TopicAlreadyExists {
                        topic: topic.to_string(),
                    });
                }
                let dir = self.primary_root().join(topic);
                let log = Log::open(dir, self.max_segment_entries, self.max_segment_bytes, self.fsync_policy)?;
                entry.insert(Slot::Live(Arc::new(TopicHandle {
                    topic: topic.to_string(),
                    log: Mutex::new(log),
                    tombstoned: AtomicBool::new(false),
                })));
                info!(topic, "topic created");
                Ok(())
            }
        }
    }

    #[instrument(skip(self))]
    pub fn delete(&self, topic: &str) -> Result<(), BrokerError> {
        let cached = self.topics.get(topic).map(|slot| match slot.value() {
            Slot::Live(handle) => Some(Arc::clone(handle)),
            Slot::Tombstoned => None,
        });

        let handle = match cached {
            Some(Some(handle)) => handle,
            Some(None) => {
                return Err(BrokerError::TopicDoesNotExist {
                    topic: topic.to_string(),
                });
            }
            None => {
                let dir = self.existing_topic_dir(topic).ok_or_else(|| BrokerError::TopicDoesNotExist {
                    topic: topic.to_string(),
                })?;
                let log = Log::open(dir, self.max_segment_entries, self.max_segment_bytes, self.fsync_policy)?;
                Arc::new(TopicHandle {
                    topic: topic.to_string(),
                    log: Mutex::new(log),
                    tombstoned: AtomicBool::new(false),
                })
            }
        };

        handle.tombstoned.store(true, Ordering::SeqCst);
        // Replace (rather than remove) the map entry: `get`/`create` must
        // keep seeing this topic as deleted for as long as any clone of
        // `handle` is still alive, not just until this call returns.
        self.topics.insert(topic.to_string(), Slot::Tombstoned);
        info!(topic, "topic tombstoned for deletion");
        // `handle` drops here; if we're the last reference the directory is
        // removed immediately, otherwise it is removed once in-flight
        // produce/consume operations release their clones.
        Ok(())
    }

    /// Sorted topic names matching every supplied filter; an absent filter
    /// matches everything (§4.2).
    pub fn list(&self, prefix: Option<&str>, suffix: Option<&str>, regex: Option<&Regex>) -> Result<Vec<String>, BrokerError> {
        let mut names = Vec::new();
        for root in &self.root_dirs {
            if !root.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(root)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        names.dedup();

        Ok(names
            .into_iter()
            .filter(|name| prefix.is_none_or(|p| name.starts_with(p)))
            .filter(|name| suffix.is_none_or(|s| name.ends_with(s)))
            .filter(|name| regex.is_none_or(|r| r.is_match(name)))
            .collect())
    }

    /// Looks up (or lazily opens) the handle for `topic`, incrementing its
    /// refcount for the duration the caller holds the returned `Arc`.
    #[instrument(skip(self))]
    pub fn get(&self, topic: &str) -> Result<Arc<TopicHandle>, BrokerError> {
        if let Some(slot) = self.topics.get(topic) {
            match slot.value() {
                Slot::Live(handle) => return Ok(Arc::clone(handle)),
                Slot::Tombstoned => {
                    drop(slot);
                    self.reap_if_tombstoned_and_gone(topic);
                    return Err(BrokerError::TopicDoesNotExist {
                        topic: topic.to_string(),
                    });
                }
            }
        }

        let dir = self
            .existing_topic_dir(topic)
            .ok_or_else(|| BrokerError::TopicDoesNotExist {
                topic: topic.to_string(),
            })?;
        let log = Log::open(dir, self.max_segment_entries, self.max_segment_bytes, self.fsync_policy)?;
        let handle = Arc::new(TopicHandle {
            topic: topic.to_string(),
            log: Mutex::new(log),
            tombstoned: AtomicBool::new(false),
        });
        self.topics.insert(topic.to_string(), Slot::Live(Arc::clone(&handle)));
        Ok(handle)
    }
}
