//! Shared data-model types: topic-name validation and offset sentinels (§3).

use crate::errors::BrokerError;

/// Sentinel passed as a consume start offset meaning "latest available"
/// (resolves to `max + 1`, an empty read).
pub const OFFSET_LATEST: i64 = -1;

/// Sentinel passed as a consume start offset meaning "earliest available"
/// (resolves to `min`).
pub const OFFSET_EARLIEST: i64 = -2;

/// Sentinel for `maxBatch` meaning "as many messages as fit in the segment
/// containing the start offset".
pub const MAX_BATCH_UNBOUNDED: i64 = -1;

const MAX_TOPIC_NAME_LEN: usize = 255;

/// Validates a topic name against the safe-filename alphabet required by
/// §3: non-empty, no path separators, no leading dot, bounded length.
pub fn validate_topic_name(topic: &str) -> Result<(), BrokerError> {
    if topic.is_empty() {
        return Err(BrokerError::invalid_topic_name(topic, "topic name is empty"));
    }
    if topic.len() > MAX_TOPIC_NAME_LEN {
        return Err(BrokerError::invalid_topic_name(
            topic,
            format!("topic name longer than {MAX_TOPIC_NAME_LEN} bytes"),
        ));
    }
    if topic.starts_with('.') {
        return Err(BrokerError::invalid_topic_name(
            topic,
            "topic name must not start with '.'",
        ));
    }
    if topic.contains('/') || topic.contains('\\') || topic == "." || topic == ".." {
        return Err(BrokerError::invalid_topic_name(
            topic,
            "topic name must not contain a path separator",
        ));
    }
    if topic.contains('\0') {
        return Err(BrokerError::invalid_topic_name(
            topic,
            "topic name must not contain a NUL byte",
        ));
    }
    Ok(())
}
