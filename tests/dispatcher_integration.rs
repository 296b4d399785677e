//! Exercises the Request Dispatcher end-to-end against the literal
//! scenarios in the testable-properties section, as a transport-free
//! stand-in for what the gRPC layer would drive.

use appendlog_broker::config::BrokerConfig;
use appendlog_broker::dispatcher::Dispatcher;
use appendlog_broker::errors::BrokerError;
use tempfile::TempDir;

fn dispatcher(root: &std::path::Path) -> Dispatcher {
    Dispatcher::new(BrokerConfig {
        root_dirs: vec![root.to_path_buf()],
        ..BrokerConfig::default()
    })
}

#[tokio::test]
async fn scenario_1_single_message_round_trip() {
    let dir = TempDir::new().unwrap();
    let dispatcher = dispatcher(dir.path());

    dispatcher.create_topic("t".to_string()).await.unwrap();
    let first = dispatcher.produce("t".to_string(), vec![5], b"hello".to_vec()).await.unwrap();
    assert_eq!(first, 0);
    assert_eq!(dispatcher.offsets("t".to_string()).await.unwrap(), (0, 0));

    let plan = dispatcher.consume("t".to_string(), 0, 10).await.unwrap();
    assert_eq!(plan.sizes, vec![5]);
    let body = std::fs::read(&plan.data_file_path).unwrap();
    assert_eq!(&body[plan.byte_pos as usize..], b"hello");
}

#[tokio::test]
async fn scenario_2_partial_batch_consume() {
    let dir = TempDir::new().unwrap();
    let dispatcher = dispatcher(dir.path());

    dispatcher.create_topic("t".to_string()).await.unwrap();
    dispatcher
        .produce("t".to_string(), vec![3, 3, 3], b"abcdefghi".to_vec())
        .await
        .unwrap();

    let plan = dispatcher.consume("t".to_string(), 1, 2).await.unwrap();
    assert_eq!(plan.sizes, vec![3, 3]);
    let body = std::fs::read(&plan.data_file_path).unwrap();
    let start = plan.byte_pos as usize;
    assert_eq!(&body[start..start + 6], b"defghi");
}

#[tokio::test]
async fn scenario_4_truncate_then_offset_out_of_range() {
    let dir = TempDir::new().unwrap();
    let dispatcher = dispatcher(dir.path());

    dispatcher.create_topic("t".to_string()).await.unwrap();
    dispatcher.produce("t".to_string(), vec![1], b"x".to_vec()).await.unwrap();
    dispatcher.truncate_topic("t".to_string(), 1).await.unwrap();

    assert_eq!(dispatcher.offsets("t".to_string()).await.unwrap(), (1, 0));
    let result = dispatcher.consume("t".to_string(), 0, 10).await;
    assert!(matches!(result, Err(BrokerError::OffsetOutOfRange { topic, offset: 0, min: 1 }) if topic == "t"));
}

#[tokio::test]
async fn list_topics_filters_through_dispatcher() {
    let dir = TempDir::new().unwrap();
    let dispatcher = dispatcher(dir.path());
    for topic in ["orders.v1", "orders.v2", "payments.v1"] {
        dispatcher.create_topic(topic.to_string()).await.unwrap();
    }

    let names = dispatcher
        .list_topics(Some("orders".to_string()), None, None)
        .await
        .unwrap();
    assert_eq!(names, vec!["orders.v1", "orders.v2"]);
}

#[tokio::test]
async fn inspect_topic_reports_segment_bounds() {
    let dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(BrokerConfig {
        root_dirs: vec![dir.path().to_path_buf()],
        max_segment_entries: 2,
        ..BrokerConfig::default()
    });

    dispatcher.create_topic("t".to_string()).await.unwrap();
    for byte in [b"a", b"b", b"c"] {
        dispatcher.produce("t".to_string(), vec![1], byte.to_vec()).await.unwrap();
    }

    let inspection = dispatcher.inspect_topic("t".to_string()).await.unwrap();
    assert_eq!((inspection.min_offset, inspection.max_offset), (0, 2));
    assert_eq!(inspection.segment_count, 2);
    assert_eq!(inspection.max_segment_entries, 2);
}
