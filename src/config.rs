//! Typed configuration (§6, expanded in SPEC_FULL §A.3). Loaded from an
//! optional TOML file plus `BROKER_`-prefixed environment variable
//! overrides; no CLI flag parser is in scope.

use std::path::PathBuf;

use serde::Deserialize;

use crate::errors::BrokerError;

/// fsync policy applied when durability is published for a produce batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsyncPolicy {
    PerBatch,
    PerNBatches(u32),
    Never,
}

impl Default for FsyncPolicy {
    fn default() -> Self {
        FsyncPolicy::PerBatch
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ListenEndpoint {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Topics are created in the first directory; reads fall through to
    /// later ones (multi-root is used for tiered or migrated storage).
    pub root_dirs: Vec<PathBuf>,
    pub max_segment_entries: u64,
    /// `None` means unlimited.
    pub max_segment_bytes: Option<u64>,
    pub fsync_policy: FsyncPolicy,
    pub default_batch_size: i64,
    pub listen_endpoints: Vec<ListenEndpoint>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            root_dirs: vec![PathBuf::from("data")],
            max_segment_entries: 5000,
            max_segment_bytes: None,
            fsync_policy: FsyncPolicy::PerBatch,
            default_batch_size: -1,
            listen_endpoints: vec![ListenEndpoint::Tcp {
                host: "127.0.0.1".to_string(),
                port: 4420,
            }],
        }
    }
}

impl BrokerConfig {
    /// Primary root directory new topics are created in.
    pub fn primary_root(&self) -> &PathBuf {
        self.root_dirs
            .first()
            .expect("BrokerConfig::root_dirs must not be empty")
    }

    /// Load from an optional TOML file, then apply `BROKER_*` environment
    /// overrides for the scalar fields.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, BrokerError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str(&text)
                    .map_err(|e| BrokerError::bad_argument(format!("invalid config file: {e}")))?
            }
            None => BrokerConfig::default(),
        };

        if let Ok(root) = std::env::var("BROKER_ROOT_DIR") {
            config.root_dirs = vec![PathBuf::from(root)];
        }
        if let Ok(value) = std::env::var("BROKER_MAX_SEGMENT_ENTRIES") {
            config.max_segment_entries = value
                .parse()
                .map_err(|_| BrokerError::bad_argument("BROKER_MAX_SEGMENT_ENTRIES must be a u64"))?;
        }
        if let Ok(value) = std::env::var("BROKER_MAX_SEGMENT_BYTES") {
            config.max_segment_bytes = Some(
                value
                    .parse()
                    .map_err(|_| BrokerError::bad_argument("BROKER_MAX_SEGMENT_BYTES must be a u64"))?,
            );
        }
        if let Ok(value) = std::env::var("BROKER_DEFAULT_BATCH_SIZE") {
            config.default_batch_size = value
                .parse()
                .map_err(|_| BrokerError::bad_argument("BROKER_DEFAULT_BATCH_SIZE must be an i64"))?;
        }

        if config.root_dirs.is_empty() {
            return Err(BrokerError::bad_argument("root_dirs must not be empty"));
        }

        Ok(config)
    }
}
