use std::io;

use thiserror::Error;

/// Top-level error returned by every dispatcher operation. One variant per
/// error Kind named in the request surface contract; each wraps whichever
/// lower layer actually produced it.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("topic does not exist: {topic}")]
    TopicDoesNotExist { topic: String },

    #[error("topic already exists: {topic}")]
    TopicAlreadyExists { topic: String },

    #[error("invalid topic name {topic:?}: {reason}")]
    InvalidTopicName { topic: String, reason: String },

    #[error("offset {offset} out of range for topic {topic} (min={min})")]
    OffsetOutOfRange {
        topic: String,
        offset: i64,
        min: i64,
    },

    #[error("bad argument: {message}")]
    BadArgument { message: String },

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: i64, actual: i64 },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("undefined error: {message}")]
    Undefined { message: String },
}

impl BrokerError {
    pub fn invalid_topic_name(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        BrokerError::InvalidTopicName {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    pub fn bad_argument(message: impl Into<String>) -> Self {
        BrokerError::BadArgument {
            message: message.into(),
        }
    }

    /// Stable string identifying the error Kind, independent of its message,
    /// used for both the wire-code table and the gRPC status translation.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::TopicDoesNotExist { .. } => "topic-does-not-exist",
            BrokerError::TopicAlreadyExists { .. } => "topic-already-exists",
            BrokerError::InvalidTopicName { .. } => "invalid-topic-name",
            BrokerError::OffsetOutOfRange { .. } => "offset-out-of-range",
            BrokerError::BadArgument { .. } => "bad-argument",
            BrokerError::ShortRead { .. } => "short-read",
            BrokerError::Io(_) => "io-error",
            BrokerError::Cancelled => "cancelled",
            BrokerError::Undefined { .. } => "undefined",
            BrokerError::Storage(e) => e.kind(),
            BrokerError::Index(e) => e.kind(),
            BrokerError::Segment(e) => e.kind(),
            BrokerError::Log(e) => e.kind(),
        }
    }

    /// Two-byte big-endian wire code from §6. Kinds the base table doesn't
    /// name get a broker-assigned extension code; anything still
    /// unrecognized falls back to `FF FF`.
    pub fn wire_code(&self) -> [u8; 2] {
        match self.kind() {
            "topic-does-not-exist" => [0x00, 0x01],
            "topic-already-exists" => [0x00, 0x02],
            "invalid-topic-name" => [0x00, 0x03],
            "offset-out-of-range" => [0x00, 0x04],
            "bad-argument" => [0x00, 0x05],
            "short-read" => [0x00, 0x06],
            "io-error" => [0x00, 0x07],
            "cancelled" => [0x00, 0x08],
            _ => [0xFF, 0xFF],
        }
    }
}

/// Errors from the data-file layer (`storage::store`).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open store file {path}")]
    OpenFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write to store at position {position}")]
    WriteFailed {
        position: u64,
        #[source]
        source: io::Error,
    },

    #[error("failed to read from store at position {position}")]
    ReadFailed {
        position: u64,
        #[source]
        source: io::Error,
    },

    #[error("read range [{position}, {position}+{len}) is beyond store size {size}")]
    ReadBeyondEnd { position: u64, len: u64, size: u64 },

    #[error("failed to sync store to disk")]
    SyncFailed {
        #[source]
        source: io::Error,
    },

    #[error("failed to truncate store to {target_size}")]
    TruncateFailed {
        target_size: u64,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn kind(&self) -> &'static str {
        "io-error"
    }
}

/// Errors from the index-file layer (`storage::index`).
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to open index file {path}")]
    OpenFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write index record at entry {entry}")]
    WriteFailed {
        entry: u64,
        #[source]
        source: io::Error,
    },

    #[error("failed to read index record at entry {entry}")]
    ReadFailed {
        entry: u64,
        #[source]
        source: io::Error,
    },

    #[error("index entry {entry} not found (have {len} entries)")]
    EntryNotFound { entry: u64, len: u64 },

    #[error("failed to sync index to disk")]
    SyncFailed {
        #[source]
        source: io::Error,
    },

    #[error("failed to truncate index to {target_entries} entries")]
    TruncateFailed {
        target_entries: u64,
        #[source]
        source: io::Error,
    },
}

impl IndexError {
    fn kind(&self) -> &'static str {
        "io-error"
    }
}

/// Errors from a single segment (store + index pair).
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error(
        "segment invariant violated: base={base_offset} count={count} data_len={data_len} expected={expected}"
    )]
    InvariantViolated {
        base_offset: i64,
        count: u64,
        data_len: u64,
        expected: u64,
    },
}

impl SegmentError {
    fn kind(&self) -> &'static str {
        match self {
            SegmentError::Storage(e) => e.kind(),
            SegmentError::Index(e) => e.kind(),
            SegmentError::InvariantViolated { .. } => "io-error",
        }
    }
}

/// Errors from the multi-segment per-topic log (`storage::log`).
#[derive(Debug, Error)]
pub enum LogError {
    #[error("directory error for path {path}")]
    Directory {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),

    #[error("offset {offset} out of range (min={min}, max={max})")]
    OffsetOutOfRange { offset: i64, min: i64, max: i64 },

    #[error("bad argument: {message}")]
    BadArgument { message: String },
}

impl LogError {
    fn kind(&self) -> &'static str {
        match self {
            LogError::Directory { .. } => "io-error",
            LogError::Segment(e) => e.kind(),
            LogError::OffsetOutOfRange { .. } => "offset-out-of-range",
            LogError::BadArgument { .. } => "bad-argument",
        }
    }
}

impl From<&BrokerError> for tonic::Status {
    /// Transport-terminal mapping, used only where an error can't be
    /// packaged into a response envelope (e.g. a streaming body read that
    /// fails after the envelope has already been sent). Application-level
    /// failures otherwise stay inside the envelope per §7.
    fn from(error: &BrokerError) -> Self {
        match error {
            BrokerError::TopicDoesNotExist { .. } => tonic::Status::not_found(error.to_string()),
            BrokerError::TopicAlreadyExists { .. } => tonic::Status::already_exists(error.to_string()),
            BrokerError::InvalidTopicName { .. } | BrokerError::BadArgument { .. } | BrokerError::ShortRead { .. } => {
                tonic::Status::invalid_argument(error.to_string())
            }
            BrokerError::OffsetOutOfRange { .. } => tonic::Status::out_of_range(error.to_string()),
            BrokerError::Cancelled => tonic::Status::cancelled(error.to_string()),
            BrokerError::Io(_) | BrokerError::Storage(_) | BrokerError::Index(_) | BrokerError::Segment(_) | BrokerError::Log(_) => {
                tonic::Status::internal(error.to_string())
            }
            BrokerError::Undefined { .. } => tonic::Status::unknown(error.to_string()),
        }
    }
}

/// Extension trait mirroring the teacher's `with_*_context` helpers: attach
/// structured context to a raw `io::Error` at the point it's produced.
pub trait StorageContext<T> {
    fn with_open_context(self, path: &str) -> Result<T, StorageError>;
    fn with_write_context(self, position: u64) -> Result<T, StorageError>;
    fn with_read_context(self, position: u64) -> Result<T, StorageError>;
    fn with_sync_context(self) -> Result<T, StorageError>;
    fn with_truncate_context(self, target_size: u64) -> Result<T, StorageError>;
}

impl<T> StorageContext<T> for Result<T, io::Error> {
    fn with_open_context(self, path: &str) -> Result<T, StorageError> {
        self.map_err(|source| StorageError::OpenFailed {
            path: path.to_string(),
            source,
        })
    }

    fn with_write_context(self, position: u64) -> Result<T, StorageError> {
        self.map_err(|source| StorageError::WriteFailed { position, source })
    }

    fn with_read_context(self, position: u64) -> Result<T, StorageError> {
        self.map_err(|source| StorageError::ReadFailed { position, source })
    }

    fn with_sync_context(self) -> Result<T, StorageError> {
        self.map_err(|source| StorageError::SyncFailed { source })
    }

    fn with_truncate_context(self, target_size: u64) -> Result<T, StorageError> {
        self.map_err(|source| StorageError::TruncateFailed {
            target_size,
            source,
        })
    }
}

pub trait IndexContext<T> {
    fn with_open_context(self, path: &str) -> Result<T, IndexError>;
    fn with_write_context(self, entry: u64) -> Result<T, IndexError>;
    fn with_read_context(self, entry: u64) -> Result<T, IndexError>;
    fn with_sync_context(self) -> Result<T, IndexError>;
    fn with_truncate_context(self, target_entries: u64) -> Result<T, IndexError>;
}

impl<T> IndexContext<T> for Result<T, io::Error> {
    fn with_open_context(self, path: &str) -> Result<T, IndexError> {
        self.map_err(|source| IndexError::OpenFailed {
            path: path.to_string(),
            source,
        })
    }

    fn with_write_context(self, entry: u64) -> Result<T, IndexError> {
        self.map_err(|source| IndexError::WriteFailed { entry, source })
    }

    fn with_read_context(self, entry: u64) -> Result<T, IndexError> {
        self.map_err(|source| IndexError::ReadFailed { entry, source })
    }

    fn with_sync_context(self) -> Result<T, IndexError> {
        self.map_err(|source| IndexError::SyncFailed { source })
    }

    fn with_truncate_context(self, target_entries: u64) -> Result<T, IndexError> {
        self.map_err(|source| IndexError::TruncateFailed {
            target_entries,
            source,
        })
    }
}
