//! Exercises the segment-store stack (`Store`, `Index`, `Segment`, `Log`)
//! cooperating end-to-end, covering the literal scenarios from the
//! testable-properties section: contiguous offset assignment, segment
//! rolling stopping a batch read at a boundary, and payload round-trips
//! across process restarts.

use appendlog_broker::config::FsyncPolicy;
use appendlog_broker::storage::log::Log;
use tempfile::TempDir;

fn messages(strs: &[&str]) -> Vec<Vec<u8>> {
    strs.iter().map(|s| s.as_bytes().to_vec()).collect()
}

#[test]
fn scenario_single_batch_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut log = Log::open(dir.path(), 5000, None, FsyncPolicy::PerBatch).unwrap();

    let first = log.append(&messages(&["hello"])).unwrap();
    assert_eq!(first, 0);
    assert_eq!(log.offsets(), (0, 0));

    let (_, pos, sizes) = log.plan_read(0, 10).unwrap();
    assert_eq!(sizes, vec![5]);
    assert_eq!(log.read_payload(0).unwrap(), b"hello");
    assert_eq!(pos, 0);
}

#[test]
fn scenario_multi_message_batch_partial_consume() {
    let dir = TempDir::new().unwrap();
    let mut log = Log::open(dir.path(), 5000, None, FsyncPolicy::PerBatch).unwrap();

    log.append(&messages(&["abc", "def", "ghi"])).unwrap();

    let (filename, pos, sizes) = log.plan_read(1, 2).unwrap();
    assert_eq!(sizes, vec![3, 3]);
    let data = std::fs::read(dir.path().join(filename)).unwrap();
    assert_eq!(&data[pos as usize..pos as usize + 6], b"defghi");
}

#[test]
fn scenario_segment_boundary_stops_batch_early() {
    let dir = TempDir::new().unwrap();
    let mut log = Log::open(dir.path(), 2, None, FsyncPolicy::PerBatch).unwrap();

    for c in ["a", "b", "c", "d", "e"] {
        log.append(&messages(&[c])).unwrap();
    }

    let mut base_offsets: Vec<i64> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter_map(|name| appendlog_broker::storage::segment::base_offset_from_data_file_name(&name))
        .collect();
    base_offsets.sort_unstable();
    assert_eq!(base_offsets, vec![0, 2, 4]);

    let (_, _, sizes) = log.plan_read(3, 10).unwrap();
    assert_eq!(sizes, vec![1, 1]);
    assert_eq!(log.read_payload(3).unwrap(), b"d");
    assert_eq!(log.read_payload(4).unwrap(), b"e");
}

#[test]
fn scenario_produce_truncate_offsets_then_out_of_range_consume() {
    let dir = TempDir::new().unwrap();
    let mut log = Log::open(dir.path(), 5000, None, FsyncPolicy::PerBatch).unwrap();

    log.append(&messages(&["x"])).unwrap();
    log.truncate(1).unwrap();

    assert_eq!(log.offsets(), (1, 0));
    assert!(log.plan_read(0, 10).is_err());
}

#[test]
fn restart_recovers_segments_and_serves_reads() {
    let dir = TempDir::new().unwrap();
    {
        let mut log = Log::open(dir.path(), 2, None, FsyncPolicy::PerBatch).unwrap();
        for c in ["a", "b", "c"] {
            log.append(&messages(&[c])).unwrap();
        }
    }

    let log = Log::open(dir.path(), 2, None, FsyncPolicy::PerBatch).unwrap();
    assert_eq!(log.offsets(), (0, 2));
    assert_eq!(log.read_payload(0).unwrap(), b"a");
    assert_eq!(log.read_payload(2).unwrap(), b"c");
}
