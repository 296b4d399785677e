//! Exercises the Topic Registry's lifecycle and refcounted handle
//! semantics directly against the filesystem, independent of the
//! dispatcher/transport layers.

use appendlog_broker::config::BrokerConfig;
use appendlog_broker::errors::BrokerError;
use appendlog_broker::registry::Registry;
use tempfile::TempDir;

fn registry(root: &std::path::Path) -> Registry {
    Registry::new(&BrokerConfig {
        root_dirs: vec![root.to_path_buf()],
        ..BrokerConfig::default()
    })
}

#[test]
fn multiple_topics_are_independent() {
    let dir = TempDir::new().unwrap();
    let registry = registry(dir.path());

    registry.create("orders").unwrap();
    registry.create("payments").unwrap();

    registry.get("orders").unwrap().append(&[b"o1".to_vec()]).unwrap();
    registry.get("payments").unwrap().append(&[b"p1".to_vec(), b"p2".to_vec()]).unwrap();

    assert_eq!(registry.get("orders").unwrap().offsets(), (0, 0));
    assert_eq!(registry.get("payments").unwrap().offsets(), (0, 1));
}

#[test]
fn surviving_handle_keeps_directory_alive_across_reads() {
    let dir = TempDir::new().unwrap();
    let registry = registry(dir.path());
    registry.create("orders").unwrap();
    registry.get("orders").unwrap().append(&[b"hello".to_vec()]).unwrap();

    let held = registry.get("orders").unwrap();
    registry.delete("orders").unwrap();

    assert_eq!(held.read_payload(0).unwrap(), b"hello");
    assert!(matches!(registry.get("orders"), Err(BrokerError::TopicDoesNotExist { .. })));

    drop(held);
    assert!(!dir.path().join("orders").is_dir());
}

#[test]
fn invalid_topic_name_is_rejected_before_touching_disk() {
    let dir = TempDir::new().unwrap();
    let registry = registry(dir.path());
    let result = registry.create("../escape");
    assert!(matches!(result, Err(BrokerError::InvalidTopicName { .. })));
    assert!(!dir.path().join("..").join("escape").is_dir());
}

#[test]
fn reopening_an_existing_topic_directory_recovers_its_data() {
    let dir = TempDir::new().unwrap();
    {
        let registry = registry(dir.path());
        registry.create("orders").unwrap();
        registry.get("orders").unwrap().append(&[b"a".to_vec(), b"b".to_vec()]).unwrap();
    }

    let registry = registry(dir.path());
    let handle = registry.get("orders").unwrap();
    assert_eq!(handle.offsets(), (0, 1));
    assert_eq!(handle.read_payload(1).unwrap(), b"b");
}
