// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! In-memory stream index.
//!
//! The index is an immutable [`IndexSnapshot`] behind an atomically swapped
//! reference. The single writer builds the next snapshot from the current one
//! (copy-on-append) and publishes it in one pointer swap; readers clone the
//! reference and never observe a half-applied append.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// One record as seen through its stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub version: u64,
    pub data: Bytes,
}

/// One record as seen through the global append log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalRecord {
    /// 1-based position in append order.
    pub position: u64,
    pub stream: Arc<str>,
    pub version: u64,
    pub data: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSnapshot {
    streams: FxHashMap<Arc<str>, Arc<Vec<StreamRecord>>>,
    global: Arc<Vec<GlobalRecord>>,
}

impl IndexSnapshot {
    /// Number of records in `stream`, which is also its current version.
    pub fn stream_version(&self, stream: &str) -> u64 {
        self.streams
            .get(stream)
            .map(|records| records.len() as u64)
            .unwrap_or(0)
    }

    pub fn global_position(&self) -> u64 {
        self.global.len() as u64
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.streams.keys().map(|k| k.to_string()).collect();
        names.sort();
        names
    }

    /// Records of `stream` with version greater than `after_version`.
    pub fn read_stream(&self, stream: &str, after_version: u64, max_count: usize) -> Vec<StreamRecord> {
        let Some(records) = self.streams.get(stream) else {
            return Vec::new();
        };
        // Versions are gapless from 1, so version v lives at index v - 1.
        let start = (after_version as usize).min(records.len());
        records[start..].iter().take(max_count).cloned().collect()
    }

    /// Global records with position greater than `after_position`.
    pub fn read_all(&self, after_position: u64, max_count: usize) -> Vec<GlobalRecord> {
        let start = (after_position as usize).min(self.global.len());
        self.global[start..].iter().take(max_count).cloned().collect()
    }

    /// Adds a replayed record while building a snapshot.
    ///
    /// Returns false (and changes nothing) when `version` does not directly
    /// follow the stream's current version.
    pub fn push(&mut self, stream: &str, version: u64, data: Bytes) -> bool {
        if version != self.stream_version(stream) + 1 {
            return false;
        }

        let key = self.intern(stream);
        Arc::make_mut(self.streams.entry(Arc::clone(&key)).or_default()).push(StreamRecord {
            version,
            data: data.clone(),
        });

        let position = self.global.len() as u64 + 1;
        Arc::make_mut(&mut self.global).push(GlobalRecord {
            position,
            stream: key,
            version,
            data,
        });
        true
    }

    /// Returns a new snapshot with one more record, leaving `self` untouched.
    pub fn appended(&self, stream: &str, version: u64, data: Bytes) -> IndexSnapshot {
        debug_assert_eq!(version, self.stream_version(stream) + 1);

        let key = self.intern(stream);
        let mut records = match self.streams.get(stream) {
            Some(existing) => {
                let mut records = Vec::with_capacity(existing.len() + 1);
                records.extend_from_slice(existing);
                records
            }
            None => Vec::with_capacity(1),
        };
        records.push(StreamRecord {
            version,
            data: data.clone(),
        });

        let mut global = Vec::with_capacity(self.global.len() + 1);
        global.extend_from_slice(&self.global);
        global.push(GlobalRecord {
            position: self.global.len() as u64 + 1,
            stream: Arc::clone(&key),
            version,
            data,
        });

        let mut streams = self.streams.clone();
        streams.insert(key, Arc::new(records));

        IndexSnapshot {
            streams,
            global: Arc::new(global),
        }
    }

    fn intern(&self, stream: &str) -> Arc<str> {
        self.streams
            .get_key_value(stream)
            .map(|(key, _)| Arc::clone(key))
            .unwrap_or_else(|| Arc::from(stream))
    }
}

/// The published snapshot.
#[derive(Debug, Default)]
pub struct StreamIndex {
    current: RwLock<Arc<IndexSnapshot>>,
}

impl StreamIndex {
    pub fn new(snapshot: IndexSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The latest published snapshot. Only ever waits for a pointer swap.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn publish(&self, snapshot: IndexSnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_push_builds_both_views() {
        let mut snapshot = IndexSnapshot::default();
        assert!(snapshot.push("a", 1, data("a1")));
        assert!(snapshot.push("b", 1, data("b1")));
        assert!(snapshot.push("a", 2, data("a2")));

        assert_eq!(snapshot.stream_version("a"), 2);
        assert_eq!(snapshot.stream_version("b"), 1);
        assert_eq!(snapshot.stream_version("missing"), 0);
        assert_eq!(snapshot.global_position(), 3);
        assert_eq!(snapshot.stream_names(), vec!["a".to_string(), "b".to_string()]);

        let all = snapshot.read_all(0, usize::MAX);
        let order: Vec<(&str, u64, u64)> = all
            .iter()
            .map(|r| (&*r.stream, r.version, r.position))
            .collect();
        assert_eq!(order, vec![("a", 1, 1), ("b", 1, 2), ("a", 2, 3)]);
    }

    #[test]
    fn test_push_rejects_gaps() {
        let mut snapshot = IndexSnapshot::default();
        assert!(!snapshot.push("a", 2, data("x")));
        assert!(snapshot.push("a", 1, data("x")));
        assert!(!snapshot.push("a", 1, data("dup")));
        assert_eq!(snapshot.global_position(), 1);
    }

    #[test]
    fn test_read_slices_by_version_and_count() {
        let mut snapshot = IndexSnapshot::default();
        for v in 1..=5 {
            snapshot.push("s", v, data(&v.to_string()));
        }

        let versions: Vec<u64> = snapshot
            .read_stream("s", 2, 2)
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![3, 4]);
        assert!(snapshot.read_stream("s", 5, 10).is_empty());
        assert!(snapshot.read_stream("s", 99, 10).is_empty());
        assert!(snapshot.read_stream("nope", 0, 10).is_empty());
        assert_eq!(snapshot.read_all(4, 10).len(), 1);
    }

    #[test]
    fn test_appended_leaves_original_untouched() {
        let mut base = IndexSnapshot::default();
        base.push("a", 1, data("a1"));

        let next = base.appended("a", 2, data("a2"));
        let next = next.appended("b", 1, data("b1"));

        assert_eq!(base.stream_version("a"), 1);
        assert_eq!(base.global_position(), 1);
        assert_eq!(next.stream_version("a"), 2);
        assert_eq!(next.stream_version("b"), 1);
        assert_eq!(next.read_all(0, 10)[2].position, 3);
    }

    #[test]
    fn test_readers_keep_old_snapshot() {
        let index = StreamIndex::default();
        let before = index.snapshot();

        index.publish(before.appended("a", 1, data("a1")));
        assert_eq!(before.stream_version("a"), 0);
        assert_eq!(index.snapshot().stream_version("a"), 1);
    }
}
