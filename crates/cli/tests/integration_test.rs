use std::fs;

use tapestream::{AppendOnlyStore, ExpectedVersion, StoreConfig};
use tapestream_cli::commands::{read, streams, tail, verify};
use tempfile::tempdir;

fn populate(dir: &std::path::Path) {
    let store = AppendOnlyStore::open_directory(dir, StoreConfig::default().sync_on_flush(false)).unwrap();
    store.append("customer-1", b"created", ExpectedVersion::Exact(0)).unwrap();
    store.append("customer-1", b"renamed", ExpectedVersion::Exact(1)).unwrap();
    store.append("customer-2", b"created", ExpectedVersion::Any).unwrap();
    store.close().unwrap();
}

#[test]
fn test_inspection_workflow() {
    let dir = tempdir().unwrap();
    populate(dir.path());

    assert!(streams::run(dir.path()).is_ok());
    assert!(read::run(dir.path(), "customer-1", 0, usize::MAX).is_ok());
    assert!(read::run(dir.path(), "missing", 0, 10).is_ok());
    assert!(tail::run(dir.path(), 1, 10).is_ok());
    assert!(verify::run(dir.path()).is_ok());

    let checks = verify::check(dir.path()).unwrap();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].records, 3);
    assert!(!checks[0].is_corrupt());
}

#[test]
fn test_inspection_does_not_block_writer() {
    let dir = tempdir().unwrap();
    populate(dir.path());

    let writer = AppendOnlyStore::open_directory(dir.path(), StoreConfig::default()).unwrap();
    assert!(streams::run(dir.path()).is_ok());
    assert!(verify::run(dir.path()).is_ok());
    drop(writer);
}

#[test]
fn test_verify_fails_on_damaged_tail() {
    let dir = tempdir().unwrap();
    populate(dir.path());

    let checks = verify::check(dir.path()).unwrap();
    let segment = dir.path().join(&checks[0].segment);
    let mut bytes = fs::read(&segment).unwrap();
    bytes[checks[0].valid_bytes - 1] ^= 0xFF;
    fs::write(&segment, &bytes).unwrap();

    let checks = verify::check(dir.path()).unwrap();
    assert!(checks[0].is_corrupt());
    assert_eq!(checks[0].records, 2);
    assert!(verify::run(dir.path()).is_err());
}

#[test]
fn test_missing_directory_is_an_error() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope");
    assert!(streams::run(&missing).is_err());
    assert!(verify::run(&missing).is_err());
    assert!(!missing.exists());
}
