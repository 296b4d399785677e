//! Exercises the Group Lock Manager through a `Dispatcher`-owned instance,
//! covering the literal two-client TTL contention scenario.

use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use appendlog_broker::config::BrokerConfig;
use appendlog_broker::dispatcher::Dispatcher;
use appendlog_broker::lock_manager::LockRequest;
use tempfile::TempDir;

#[test]
fn scenario_6_second_client_waits_out_the_lease() {
    let dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(BrokerConfig {
        root_dirs: vec![dir.path().to_path_buf()],
        ..BrokerConfig::default()
    });
    let lock_manager = Arc::clone(dispatcher.lock_manager());

    let client_a = lock_manager.new_session();
    let client_b = lock_manager.new_session();

    let response = lock_manager.handle(client_a, "g", LockRequest { acquire: true, ttl_ms: 50 });
    assert!(response.locked);

    let response = lock_manager.handle(client_b, "g", LockRequest { acquire: true, ttl_ms: 50 });
    assert!(!response.locked);

    sleep(Duration::from_millis(75));

    let response = lock_manager.handle(client_b, "g", LockRequest { acquire: true, ttl_ms: 50 });
    assert!(response.locked);
}

#[test]
fn distinct_groups_do_not_contend() {
    let dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(BrokerConfig {
        root_dirs: vec![dir.path().to_path_buf()],
        ..BrokerConfig::default()
    });
    let lock_manager = Arc::clone(dispatcher.lock_manager());

    let client_a = lock_manager.new_session();
    let client_b = lock_manager.new_session();

    assert!(lock_manager.handle(client_a, "g1", LockRequest { acquire: true, ttl_ms: 5000 }).locked);
    assert!(lock_manager.handle(client_b, "g2", LockRequest { acquire: true, ttl_ms: 5000 }).locked);
}
