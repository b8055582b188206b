use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tapestream::{
    AppendOnlyStore, ExpectedVersion, LeaseConfig, MemoryLeaseProvider, PageBlobStore,
    SegmentStore, StoreConfig, StoreError,
};

fn config() -> StoreConfig {
    StoreConfig::default().segment_capacity(2048).lease(
        LeaseConfig::default()
            .duration(Duration::from_millis(400))
            .renew_interval(Duration::from_millis(50))
            .acquire_attempts(2)
            .acquire_backoff(Duration::from_millis(10))
            .renew_attempts(2)
            .renew_backoff(Duration::from_millis(10)),
    )
}

#[test]
fn test_blob_store_rolls_over_and_replays() {
    let leases = Arc::new(MemoryLeaseProvider::new());
    let blobs = PageBlobStore::new("events", leases, &config()).unwrap();

    {
        let store = AppendOnlyStore::open_writer(Arc::new(blobs.clone()), config()).unwrap();
        for i in 0..10u8 {
            store.append("s", &[i; 500], ExpectedVersion::Any).unwrap();
        }
    }

    // Three 537-byte records per 2 KiB blob.
    assert_eq!(blobs.list().unwrap().len(), 4);

    let reader = AppendOnlyStore::open_reader(Arc::new(blobs), config()).unwrap();
    let records = reader.read_stream("s", 0, usize::MAX).unwrap();
    assert_eq!(records.len(), 10);
    assert_eq!(records[9].data[0], 9);
}

#[test]
fn test_second_process_cannot_take_lease() {
    let leases = Arc::new(MemoryLeaseProvider::new());
    let first = PageBlobStore::new("events", leases, &config()).unwrap();
    let second = first.clone();

    let writer = AppendOnlyStore::open_writer(Arc::new(first), config()).unwrap();
    let contender = AppendOnlyStore::open_writer(Arc::new(second.clone()), config());
    assert!(matches!(
        contender,
        Err(StoreError::LeaseAcquisition { attempts: 2, .. })
    ));

    writer.close().unwrap();
    let _takeover = AppendOnlyStore::open_writer(Arc::new(second), config()).unwrap();
}

#[test]
fn test_lost_lease_fences_writer() {
    let leases = Arc::new(MemoryLeaseProvider::new());
    let first = PageBlobStore::new("events", leases.clone(), &config()).unwrap();
    let second = first.clone();

    let writer = AppendOnlyStore::open_writer(Arc::new(first.clone()), config()).unwrap();
    writer.append("s", b"before", ExpectedVersion::Any).unwrap();

    assert!(leases.break_lease(&first.lock_resource()));

    // The renewal thread notices within a tick; the next append must fail.
    let deadline = Instant::now() + Duration::from_secs(5);
    let err = loop {
        match writer.append("s", b"zombie", ExpectedVersion::Any) {
            Err(e) => break e,
            Ok(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
            Ok(_) => panic!("writer kept appending after losing its lease"),
        }
    };
    assert!(matches!(err, StoreError::LeaseLost { .. }));
    assert!(writer.is_closed());

    let takeover = AppendOnlyStore::open_writer(Arc::new(second), config()).unwrap();
    let version = takeover.stream_version("s").unwrap();
    assert!(version >= 1);
    assert_eq!(
        takeover
            .append("s", b"after", ExpectedVersion::Exact(version))
            .unwrap(),
        version + 1
    );
}
