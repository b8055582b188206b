// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Append-only store with per-stream optimistic concurrency.
//!
//! ## Write path
//!
//! Every append runs under one writer mutex covering the version check, the
//! segment write and the index publish:
//!
//! 1. compare the caller's expected version with the stream's current one
//! 2. check the writer guard (file lock or lease)
//! 3. encode the record, rolling over to a new segment when it does not fit
//! 4. write and flush through the page buffer
//! 5. publish the next index snapshot
//!
//! A failure in steps 2-4 closes the store. Readers never take the writer
//! mutex; they read the last published snapshot.
//!
//! ## Recovery
//!
//! Opening replays every segment in name order. A damaged record ends the
//! replay of its segment; earlier records are kept and the tail is reported
//! in the [`ReplayReport`].

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::index::{GlobalRecord, IndexSnapshot, StreamIndex, StreamRecord};
use crate::lock::WriterGuard;
use crate::page::{PageBuffer, PageSink};
use crate::record::{self, CorruptReason, ScanStop};
use crate::segment::{DirectorySegmentStore, SegmentStore};
use crate::telemetry;

/// Version a caller believes a stream to be at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Append unconditionally.
    Any,
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(&self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(expected) => *expected == actual,
        }
    }
}

impl From<u64> for ExpectedVersion {
    fn from(version: u64) -> Self {
        ExpectedVersion::Exact(version)
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::Any => write!(f, "any"),
            ExpectedVersion::Exact(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncatedSegment {
    pub segment: String,
    /// Byte offset of the first discarded record.
    pub offset: usize,
    pub reason: CorruptReason,
}

/// What replay found when the store was opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub segments: usize,
    pub records: u64,
    /// Records dropped because their version did not follow the stream's.
    pub skipped: u64,
    pub truncated: Vec<TruncatedSegment>,
}

struct WriterState {
    guard: Box<dyn WriterGuard>,
    active: Option<PageBuffer<Box<dyn PageSink>>>,
}

pub struct AppendOnlyStore {
    segments: Arc<dyn SegmentStore>,
    config: StoreConfig,
    index: StreamIndex,
    writer: Mutex<Option<WriterState>>,
    is_writer: bool,
    closed: AtomicBool,
    report: ReplayReport,
}

impl AppendOnlyStore {
    /// Takes the single-writer lock, then replays existing segments.
    pub fn open_writer(segments: Arc<dyn SegmentStore>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let guard = segments.acquire_writer(&config)?;
        info!(store = %segments.describe(), guard = %guard.describe(), "Opening store for writing");

        let (snapshot, report) = replay(segments.as_ref())?;
        Ok(Self {
            segments,
            config,
            index: StreamIndex::new(snapshot),
            writer: Mutex::new(Some(WriterState {
                guard,
                active: None,
            })),
            is_writer: true,
            closed: AtomicBool::new(false),
            report,
        })
    }

    /// Replays existing segments without taking the writer lock.
    pub fn open_reader(segments: Arc<dyn SegmentStore>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        info!(store = %segments.describe(), "Opening store read-only");

        let (snapshot, report) = replay(segments.as_ref())?;
        Ok(Self {
            segments,
            config,
            index: StreamIndex::new(snapshot),
            writer: Mutex::new(None),
            is_writer: false,
            closed: AtomicBool::new(false),
            report,
        })
    }

    pub fn open_directory<P: AsRef<Path>>(dir: P, config: StoreConfig) -> Result<Self> {
        let segments = DirectorySegmentStore::open(dir, &config)?;
        Self::open_writer(Arc::new(segments), config)
    }

    pub fn open_directory_reader<P: AsRef<Path>>(dir: P, config: StoreConfig) -> Result<Self> {
        let segments = DirectorySegmentStore::open(dir, &config)?;
        Self::open_reader(Arc::new(segments), config)
    }

    /// Appends one record to `stream` and returns its commit version.
    pub fn append(&self, stream: &str, payload: &[u8], expected: ExpectedVersion) -> Result<u64> {
        if !self.is_writer {
            return Err(StoreError::ReadOnly);
        }

        let mut writer = self.writer.lock();
        let Some(state) = writer.as_mut() else {
            return Err(StoreError::Closed);
        };

        let snapshot = self.index.snapshot();
        let actual = snapshot.stream_version(stream);
        if let ExpectedVersion::Exact(expected) = expected {
            if expected != actual {
                metrics::counter!(telemetry::APPEND_CONFLICTS_TOTAL, 1);
                debug!(stream, expected, actual, "Append rejected: version mismatch");
                return Err(StoreError::Concurrency {
                    expected,
                    actual,
                    stream: stream.to_string(),
                });
            }
        }

        if let Err(e) = state.guard.check() {
            error!(stream, error = %e, "Writer no longer owns the store");
            self.close_locked(&mut writer);
            return Err(e);
        }

        let commit_version = actual + 1;
        let encoded = record::encode(commit_version, stream, payload);
        if encoded.len() as u64 > self.config.segment_capacity {
            return Err(StoreError::RecordTooLarge {
                size: encoded.len(),
                capacity: self.config.segment_capacity,
            });
        }

        if let Err(e) = self.write_record(state, &encoded, snapshot.global_position()) {
            error!(stream, commit_version, error = %e, "Write failed, closing store");
            self.close_locked(&mut writer);
            return Err(e);
        }

        let next = snapshot.appended(stream, commit_version, Bytes::copy_from_slice(payload));
        let records = next.global_position();
        self.index.publish(next);

        metrics::counter!(telemetry::APPENDS_TOTAL, 1);
        metrics::gauge!(telemetry::RECORDS, records as f64);
        debug!(stream, commit_version, bytes = encoded.len(), "Record appended");
        Ok(commit_version)
    }

    fn write_record(&self, state: &mut WriterState, encoded: &[u8], global_count: u64) -> Result<()> {
        let rollover = state
            .active
            .as_ref()
            .map_or(true, |buffer| !buffer.fits(encoded.len()));

        if rollover {
            if let Some(full) = state.active.take() {
                info!(
                    segment = full.sink().name(),
                    bytes = full.bytes_written(),
                    "Segment full, rolling over"
                );
            }
            let sink = self.segments.create(global_count)?;
            metrics::counter!(telemetry::SEGMENTS_CREATED_TOTAL, 1);
            state.active = Some(PageBuffer::new(
                sink,
                self.config.page_size,
                self.config.segment_capacity,
            ));
        }

        let buffer = state.active.as_mut().ok_or(StoreError::Closed)?;
        buffer.write(encoded);
        buffer.flush()
    }

    /// Records of `stream` with version greater than `after_version`.
    pub fn read_stream(&self, stream: &str, after_version: u64, max_count: usize) -> Result<Vec<StreamRecord>> {
        Ok(self.snapshot()?.read_stream(stream, after_version, max_count))
    }

    /// Records of every stream in append order, after `after_position`.
    pub fn read_all(&self, after_position: u64, max_count: usize) -> Result<Vec<GlobalRecord>> {
        Ok(self.snapshot()?.read_all(after_position, max_count))
    }

    pub fn stream_version(&self, stream: &str) -> Result<u64> {
        Ok(self.snapshot()?.stream_version(stream))
    }

    pub fn global_position(&self) -> Result<u64> {
        Ok(self.snapshot()?.global_position())
    }

    pub fn stream_names(&self) -> Result<Vec<String>> {
        Ok(self.snapshot()?.stream_names())
    }

    /// The current index snapshot.
    pub fn snapshot(&self) -> Result<Arc<IndexSnapshot>> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(self.index.snapshot())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_writer(&self) -> bool {
        self.is_writer
    }

    pub fn replay_report(&self) -> &ReplayReport {
        &self.report
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Releases the active segment and the writer guard. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match writer.take() {
            Some(mut state) => {
                state.active = None;
                state.guard.release()?;
                info!(store = %self.segments.describe(), "Store closed");
            }
            None => debug!(store = %self.segments.describe(), "Reader closed"),
        }
        Ok(())
    }

    /// Closes after a failed append. Release errors are only logged.
    fn close_locked(&self, writer: &mut Option<WriterState>) {
        self.closed.store(true, Ordering::Release);
        if let Some(mut state) = writer.take() {
            state.active = None;
            if let Err(e) = state.guard.release() {
                warn!(error = %e, "Failed to release writer guard");
            }
        }
    }
}

impl Drop for AppendOnlyStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Error while closing store");
        }
    }
}

impl fmt::Debug for AppendOnlyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppendOnlyStore")
            .field("segments", &self.segments.describe())
            .field("is_writer", &self.is_writer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Rebuilds the index from every segment, in order.
pub fn replay(segments: &dyn SegmentStore) -> Result<(IndexSnapshot, ReplayReport)> {
    let start = Instant::now();
    let mut snapshot = IndexSnapshot::default();
    let mut report = ReplayReport::default();

    for segment in segments.list()? {
        let bytes = segments.read(&segment)?;
        let scan = record::scan_segment(&bytes)?;
        report.segments += 1;

        for record in scan.records {
            if snapshot.push(&record.stream, record.commit_version, record.payload) {
                report.records += 1;
            } else {
                warn!(
                    segment = %segment.name,
                    stream = %record.stream,
                    version = record.commit_version,
                    expected = snapshot.stream_version(&record.stream) + 1,
                    "Skipping out-of-order record"
                );
                report.skipped += 1;
            }
        }

        if let ScanStop::Corrupt { offset, reason } = scan.stop {
            warn!(
                segment = %segment.name,
                offset,
                reason = %reason,
                discarded = bytes.len() - offset,
                "Discarding damaged segment tail"
            );
            report.truncated.push(TruncatedSegment {
                segment: segment.name.clone(),
                offset,
                reason,
            });
        }
    }

    metrics::histogram!(telemetry::REPLAY_DURATION_SECONDS, start.elapsed().as_secs_f64());
    metrics::gauge!(telemetry::RECORDS, snapshot.global_position() as f64);
    info!(
        segments = report.segments,
        records = report.records,
        streams = snapshot.stream_count(),
        truncated = report.truncated.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Replay complete"
    );
    Ok((snapshot, report))
}
