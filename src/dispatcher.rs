//! The Request Dispatcher (§4.6): the single entry point the transport
//! binding calls into. Admin and produce/consume operations run the
//! storage layer's blocking calls on the blocking thread pool (the same
//! `spawn_blocking` pattern the teacher's gRPC service used for its two
//! RPCs), keeping the async runtime free while disk I/O happens.

use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use tracing::instrument;

use crate::config::BrokerConfig;
use crate::errors::BrokerError;
use crate::lock_manager::LockManager;
use crate::registry::Registry;
use crate::watcher::Watcher;

#[derive(Debug, Clone)]
pub struct TopicInspection {
    pub min_offset: i64,
    pub max_offset: i64,
    pub max_segment_entries: u64,
    pub max_segment_bytes: Option<u64>,
    pub segment_count: usize,
}

#[derive(Debug, Clone)]
pub struct ConsumePlan {
    pub data_file_path: PathBuf,
    pub byte_pos: u64,
    pub sizes: Vec<i64>,
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    watcher: Arc<Watcher>,
    lock_manager: Arc<LockManager>,
    config: BrokerConfig,
}

impl Dispatcher {
    pub fn new(config: BrokerConfig) -> Self {
        let registry = Arc::new(Registry::new(&config));
        let watcher = Arc::new(Watcher::new(Arc::clone(&registry)));
        let lock_manager = Arc::new(LockManager::new());
        Dispatcher {
            registry,
            watcher,
            lock_manager,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn watcher(&self) -> &Arc<Watcher> {
        &self.watcher
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn default_batch_size(&self) -> i64 {
        self.config.default_batch_size
    }

    #[instrument(skip(self))]
    pub async fn create_topic(&self, topic: String) -> Result<(), BrokerError> {
        let registry = Arc::clone(&self.registry);
        run_blocking(move || registry.create(&topic)).await
    }

    #[instrument(skip(self))]
    pub async fn delete_topic(&self, topic: String) -> Result<(), BrokerError> {
        let registry = Arc::clone(&self.registry);
        run_blocking(move || registry.delete(&topic)).await
    }

    #[instrument(skip(self))]
    pub async fn list_topics(
        &self,
        prefix: Option<String>,
        suffix: Option<String>,
        regex: Option<String>,
    ) -> Result<Vec<String>, BrokerError> {
        let registry = Arc::clone(&self.registry);
        run_blocking(move || {
            let compiled = match regex {
                Some(pattern) => Some(
                    Regex::new(&pattern)
                        .map_err(|error| BrokerError::bad_argument(format!("invalid regex: {error}")))?,
                ),
                None => None,
            };
            registry.list(prefix.as_deref(), suffix.as_deref(), compiled.as_ref())
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn inspect_topic(&self, topic: String) -> Result<TopicInspection, BrokerError> {
        let registry = Arc::clone(&self.registry);
        let max_segment_entries = self.config.max_segment_entries;
        let max_segment_bytes = self.config.max_segment_bytes;
        run_blocking(move || {
            let handle = registry.get(&topic)?;
            let (min_offset, max_offset) = handle.offsets();
            Ok(TopicInspection {
                min_offset,
                max_offset,
                max_segment_entries,
                max_segment_bytes,
                segment_count: handle.segment_count(),
            })
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn truncate_topic(&self, topic: String, before_offset: i64) -> Result<i64, BrokerError> {
        let registry = Arc::clone(&self.registry);
        run_blocking(move || {
            let handle = registry.get(&topic)?;
            handle.truncate(before_offset)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn offsets(&self, topic: String) -> Result<(i64, i64), BrokerError> {
        let registry = Arc::clone(&self.registry);
        run_blocking(move || {
            let handle = registry.get(&topic)?;
            Ok(handle.offsets())
        })
        .await
    }

    /// Splits `body` into the messages `sizes` describes, failing with
    /// *short-read* if fewer bytes were supplied than declared (§4.6).
    #[instrument(skip(self, body), fields(body_len = body.len()))]
    pub async fn produce(&self, topic: String, sizes: Vec<i64>, body: Vec<u8>) -> Result<i64, BrokerError> {
        let expected: i64 = sizes.iter().sum();
        if body.len() as i64 != expected {
            return Err(BrokerError::ShortRead {
                expected,
                actual: body.len() as i64,
            });
        }

        let registry = Arc::clone(&self.registry);
        run_blocking(move || {
            let handle = registry.get(&topic)?;
            let mut messages = Vec::with_capacity(sizes.len());
            let mut cursor = 0usize;
            for size in &sizes {
                if *size < 0 {
                    return Err(BrokerError::bad_argument("message size must be non-negative"));
                }
                let size = *size as usize;
                messages.push(body[cursor..cursor + size].to_vec());
                cursor += size;
            }
            handle.append(&messages)
        })
        .await
    }

    /// Resolves the consume plan; the transport layer streams the actual
    /// payload bytes from `ConsumePlan::data_file_path` starting at
    /// `byte_pos` (§4.3).
    #[instrument(skip(self))]
    pub async fn consume(&self, topic: String, offset: i64, max_batch: i64) -> Result<ConsumePlan, BrokerError> {
        let registry = Arc::clone(&self.registry);
        run_blocking(move || {
            let handle = registry.get(&topic)?;
            let (filename, byte_pos, sizes) = handle.plan_read(offset, max_batch)?;
            Ok(ConsumePlan {
                data_file_path: handle.dir().join(filename),
                byte_pos,
                sizes,
            })
        })
        .await
    }
}

async fn run_blocking<F, T>(f: F) -> Result<T, BrokerError>
where
    F: FnOnce() -> Result<T, BrokerError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(_) => Err(BrokerError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dispatcher(root: &std::path::Path) -> Dispatcher {
        Dispatcher::new(BrokerConfig {
            root_dirs: vec![root.to_path_buf()],
            ..BrokerConfig::default()
        })
    }

    #[tokio::test]
    async fn produce_then_consume_round_trip() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(dir.path());

        dispatcher.create_topic("t".to_string()).await.unwrap();
        let first = dispatcher
            .produce("t".to_string(), vec![5], b"hello".to_vec())
            .await
            .unwrap();
        assert_eq!(first, 0);

        let (min, max) = dispatcher.offsets("t".to_string()).await.unwrap();
        assert_eq!((min, max), (0, 0));

        let plan = dispatcher.consume("t".to_string(), 0, 10).await.unwrap();
        assert_eq!(plan.sizes, vec![5]);
        let bytes = std::fs::read(&plan.data_file_path).unwrap();
        assert_eq!(&bytes[plan.byte_pos as usize..], b"hello");
    }

    #[tokio::test]
    async fn produce_with_short_body_fails() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(dir.path());
        dispatcher.create_topic("t".to_string()).await.unwrap();

        let result = dispatcher.produce("t".to_string(), vec![5], b"hi".to_vec()).await;
        assert!(matches!(result, Err(BrokerError::ShortRead { expected: 5, actual: 2 })));
    }

    #[tokio::test]
    async fn truncate_then_offsets_reports_empty_not_pristine() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(dir.path());
        dispatcher.create_topic("t".to_string()).await.unwrap();
        dispatcher.produce("t".to_string(), vec![1], b"x".to_vec()).await.unwrap();

        dispatcher.truncate_topic("t".to_string(), 1).await.unwrap();
        let offsets = dispatcher.offsets("t".to_string()).await.unwrap();
        assert_eq!(offsets, (1, 0));

        let result = dispatcher.consume("t".to_string(), 0, 10).await;
        assert!(matches!(result, Err(BrokerError::OffsetOutOfRange { offset: 0, .. })));
    }

    #[tokio::test]
    async fn consume_missing_topic_fails() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(dir.path());
        let result = dispatcher.consume("ghost".to_string(), 0, 10).await;
        assert!(matches!(result, Err(BrokerError::TopicDoesNotExist { .. })));
    }
}
