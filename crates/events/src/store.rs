// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Event streams on top of the append-only store.
//!
//! One append stores one batch of events as a single record, so a stream's
//! version counts batches, not events. Batches are encoded with bincode.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tapestream::{AppendOnlyStore, ExpectedVersion, StoreError};
use tracing::{debug, warn};

use crate::error::{EventStoreError, Result};
use crate::identity::Identity;

pub const EVENTS_APPENDED_TOTAL: &str = "tapestream_events_appended_total";

/// Events of one stream as of `version`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventStream<E> {
    pub version: u64,
    pub events: Vec<E>,
}

pub struct EventStore<E> {
    store: Arc<AppendOnlyStore>,
    _events: PhantomData<fn() -> E>,
}

impl<E> Clone for EventStore<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _events: PhantomData,
        }
    }
}

impl<E> EventStore<E>
where
    E: Serialize + DeserializeOwned + fmt::Debug,
{
    pub fn new(store: Arc<AppendOnlyStore>) -> Self {
        Self {
            store,
            _events: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<AppendOnlyStore> {
        &self.store
    }

    /// Loads events from the records after the first `skip`, at most `take` records.
    pub fn load_event_stream<I>(&self, id: &I, skip: u64, take: usize) -> Result<EventStream<E>, E>
    where
        I: Identity + ?Sized,
    {
        let name = id.stream_name();
        let snapshot = self.store.snapshot()?;
        let records = snapshot.read_stream(&name, skip, take);

        let mut stream = EventStream {
            version: skip.min(snapshot.stream_version(&name)),
            events: Vec::new(),
        };
        for record in records {
            let batch = decode_batch::<E>(&record.data).map_err(|reason| {
                EventStoreError::Deserialization {
                    stream: name.clone(),
                    version: record.version,
                    reason,
                }
            })?;
            stream.events.extend(batch);
            stream.version = record.version;
        }
        Ok(stream)
    }

    /// The whole stream.
    pub fn load<I>(&self, id: &I) -> Result<EventStream<E>, E>
    where
        I: Identity + ?Sized,
    {
        self.load_event_stream(id, 0, usize::MAX)
    }

    /// Appends `events` as one batch. Returns the new stream version, or
    /// `None` when there was nothing to append.
    pub fn append_to_stream<I>(
        &self,
        id: &I,
        expected: ExpectedVersion,
        events: &[E],
    ) -> Result<Option<u64>, E>
    where
        I: Identity + ?Sized,
    {
        if events.is_empty() {
            return Ok(None);
        }

        let name = id.stream_name();
        let payload = bincode::serde::encode_to_vec(events, bincode::config::standard())
            .map_err(|e| EventStoreError::Serialization(e.to_string()))?;

        match self.store.append(&name, &payload, expected) {
            Ok(version) => {
                metrics::counter!(EVENTS_APPENDED_TOTAL, events.len() as u64);
                for event in events {
                    debug!(stream = %name, version, event = ?event, "Event appended");
                }
                Ok(Some(version))
            }
            Err(StoreError::Concurrency { expected, .. }) => {
                let server = self.load(id)?;
                warn!(
                    stream = %name,
                    expected,
                    actual = server.version,
                    "Optimistic concurrency conflict"
                );
                Err(EventStoreError::OptimisticConcurrency {
                    expected,
                    actual: server.version,
                    identity: id.to_string(),
                    actual_events: server.events,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn decode_batch<E: DeserializeOwned>(data: &[u8]) -> std::result::Result<Vec<E>, String> {
    let (events, read) =
        bincode::serde::decode_from_slice::<Vec<E>, _>(data, bincode::config::standard())
            .map_err(|e| e.to_string())?;
    if read != data.len() {
        return Err(format!("{} trailing bytes after batch", data.len() - read));
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tapestream::StoreConfig;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Note {
        Added(String),
        Removed(u32),
    }

    fn open(dir: &std::path::Path) -> EventStore<Note> {
        let config = StoreConfig::default().sync_on_flush(false);
        EventStore::new(Arc::new(AppendOnlyStore::open_directory(dir, config).unwrap()))
    }

    #[test]
    fn test_batches_expand_on_read() {
        let dir = tempdir().unwrap();
        let events = open(dir.path());

        let batch = vec![Note::Added("a".into()), Note::Added("b".into())];
        assert_eq!(
            events
                .append_to_stream("notes-1", ExpectedVersion::Exact(0), &batch)
                .unwrap(),
            Some(1)
        );
        events
            .append_to_stream("notes-1", ExpectedVersion::Exact(1), &[Note::Removed(0)])
            .unwrap();

        let stream = events.load("notes-1").unwrap();
        assert_eq!(stream.version, 2);
        assert_eq!(
            stream.events,
            vec![
                Note::Added("a".into()),
                Note::Added("b".into()),
                Note::Removed(0)
            ]
        );
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let dir = tempdir().unwrap();
        let events = open(dir.path());

        assert_eq!(
            events
                .append_to_stream("notes-1", ExpectedVersion::Exact(7), &[])
                .unwrap(),
            None
        );
        assert_eq!(events.store().stream_version("notes-1").unwrap(), 0);
        assert_eq!(events.store().global_position().unwrap(), 0);
    }

    #[test]
    fn test_skip_and_take_count_records() {
        let dir = tempdir().unwrap();
        let events = open(dir.path());
        for i in 0..4u32 {
            events
                .append_to_stream("notes-1", ExpectedVersion::Any, &[Note::Removed(i)])
                .unwrap();
        }

        let middle = events.load_event_stream("notes-1", 1, 2).unwrap();
        assert_eq!(middle.version, 3);
        assert_eq!(middle.events, vec![Note::Removed(1), Note::Removed(2)]);

        let past_end = events.load_event_stream("notes-1", 10, 2).unwrap();
        assert_eq!(past_end.version, 4);
        assert!(past_end.events.is_empty());

        let missing = events.load("notes-2").unwrap();
        assert_eq!(missing.version, 0);
        assert!(missing.events.is_empty());
    }

    #[test]
    fn test_conflict_carries_server_events() {
        let dir = tempdir().unwrap();
        let events = open(dir.path());
        events
            .append_to_stream("notes-1", ExpectedVersion::Any, &[Note::Added("x".into())])
            .unwrap();
        events
            .append_to_stream("notes-1", ExpectedVersion::Exact(1), &[Note::Removed(0)])
            .unwrap();

        let err = events
            .append_to_stream("notes-1", ExpectedVersion::Exact(1), &[Note::Added("late".into())])
            .unwrap_err();
        match err {
            EventStoreError::OptimisticConcurrency {
                expected,
                actual,
                identity,
                actual_events,
            } => {
                assert_eq!((expected, actual), (1, 2));
                assert_eq!(identity, "notes-1");
                assert_eq!(actual_events, vec![Note::Added("x".into()), Note::Removed(0)]);
            }
            other => panic!("expected optimistic concurrency failure, got {}", other),
        }
        assert_eq!(events.load("notes-1").unwrap().version, 2);
    }

    #[test]
    fn test_foreign_payload_is_reported() {
        let dir = tempdir().unwrap();
        let events = open(dir.path());
        events
            .store()
            .append("notes-1", &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF], ExpectedVersion::Any)
            .unwrap();

        match events.load("notes-1") {
            Err(EventStoreError::Deserialization { stream, version, .. }) => {
                assert_eq!(stream, "notes-1");
                assert_eq!(version, 1);
            }
            other => panic!("expected decode failure, got {:?}", other.map(|s| s.version)),
        }
    }
}
