use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tapestream::{AppendOnlyStore, ExpectedVersion, StoreConfig};
use tempfile::tempdir;

#[test]
fn test_readers_never_observe_torn_or_shrinking_streams() {
    let dir = tempdir().unwrap();
    let config = StoreConfig::default()
        .segment_capacity(8 * 1024)
        .sync_on_flush(false);
    let store = Arc::new(AppendOnlyStore::open_directory(dir.path(), config).unwrap());
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last_len = 0usize;
                let mut last_global = 0u64;
                while !done.load(Ordering::Acquire) {
                    let records = store.read_stream("ticks", 0, usize::MAX).unwrap();
                    assert!(records.len() >= last_len, "stream version went backwards");
                    for (i, record) in records.iter().enumerate() {
                        assert_eq!(record.version, i as u64 + 1);
                        assert_eq!(record.data, format!("tick-{}", record.version).as_bytes());
                    }
                    last_len = records.len();

                    let global = store.global_position().unwrap();
                    assert!(global >= last_global);
                    last_global = global;
                }
                last_len
            })
        })
        .collect();

    for version in 0..300u64 {
        let payload = format!("tick-{}", version + 1);
        store
            .append("ticks", payload.as_bytes(), ExpectedVersion::Exact(version))
            .unwrap();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        let seen = reader.join().unwrap();
        assert!(seen <= 300);
    }
    assert_eq!(store.stream_version("ticks").unwrap(), 300);
}

#[test]
fn test_racing_writers_with_same_expected_version() {
    let dir = tempdir().unwrap();
    let config = StoreConfig::default().sync_on_flush(false);
    let store = Arc::new(AppendOnlyStore::open_directory(dir.path(), config).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store.append("contested", format!("writer-{}", i).as_bytes(), ExpectedVersion::Exact(0))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.is_concurrency()));
    assert_eq!(store.stream_version("contested").unwrap(), 1);
}
