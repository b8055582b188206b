// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Segment storage backends.
//!
//! A segment is one append-only region (file or page blob) holding framed
//! records followed by zero padding. Segment names encode the global record
//! count at creation and a UTC timestamp, so lexical order is replay order:
//!
//! ```text
//! 00000000000000000042-20250101-120000123.dat
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::lease::{AutoRenewLease, LeaseProvider};
use crate::lock::{FileLock, WriterGuard};
use crate::page::PageSink;

pub const SEGMENT_EXTENSION: &str = "dat";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub name: String,
    /// Global record count when the segment was created.
    pub starting_count: u64,
    /// Physical size, padding included.
    pub len: u64,
}

/// Where segments live and how their writer is made exclusive.
pub trait SegmentStore: Send + Sync {
    /// Segments in replay order.
    fn list(&self) -> Result<Vec<SegmentInfo>>;

    fn read(&self, segment: &SegmentInfo) -> Result<Vec<u8>>;

    /// Creates an empty segment and returns its writable sink.
    fn create(&self, starting_count: u64) -> Result<Box<dyn PageSink>>;

    fn acquire_writer(&self, config: &StoreConfig) -> Result<Box<dyn WriterGuard>>;

    fn describe(&self) -> String;
}

pub fn segment_name(starting_count: u64, created_at: DateTime<Utc>) -> String {
    format!(
        "{:020}-{}.{}",
        starting_count,
        created_at.format("%Y%m%d-%H%M%S%3f"),
        SEGMENT_EXTENSION
    )
}

/// Extracts the starting global count from a segment name.
pub fn parse_segment_name(name: &str) -> Result<u64> {
    let invalid = || StoreError::InvalidSegmentName(name.to_string());

    let stem = name
        .strip_suffix(SEGMENT_EXTENSION)
        .and_then(|s| s.strip_suffix('.'))
        .ok_or_else(invalid)?;
    let (count, _timestamp) = stem.split_once('-').ok_or_else(invalid)?;
    if count.len() != 20 {
        return Err(invalid());
    }
    count.parse::<u64>().map_err(|_| invalid())
}

fn sort_segments(segments: &mut [SegmentInfo]) {
    segments.sort_by(|a, b| {
        a.starting_count
            .cmp(&b.starting_count)
            .then_with(|| a.name.cmp(&b.name))
    });
}

// ---------------------------------------------------------------------------
// Local directory
// ---------------------------------------------------------------------------

/// A directory of segment files guarded by a lock marker.
#[derive(Debug, Clone)]
pub struct DirectorySegmentStore {
    dir: PathBuf,
    sync_on_flush: bool,
}

impl DirectorySegmentStore {
    /// Opens (creating if needed) a store directory.
    pub fn open<P: AsRef<Path>>(dir: P, config: &StoreConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            sync_on_flush: config.sync_on_flush,
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn segment_path(&self, segment: &SegmentInfo) -> PathBuf {
        self.dir.join(&segment.name)
    }
}

impl SegmentStore for DirectorySegmentStore {
    fn list(&self) -> Result<Vec<SegmentInfo>> {
        let mut segments = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(SEGMENT_EXTENSION) {
                continue;
            }

            let starting_count = match parse_segment_name(&name) {
                Ok(count) => count,
                Err(_) => {
                    warn!(file = %name, "Ignoring file with unexpected segment name");
                    continue;
                }
            };

            let len = entry.metadata()?.len();
            if len == 0 {
                // Created but never flushed.
                debug!(segment = %name, "Skipping empty segment");
                continue;
            }

            segments.push(SegmentInfo {
                name,
                starting_count,
                len,
            });
        }

        sort_segments(&mut segments);
        Ok(segments)
    }

    fn read(&self, segment: &SegmentInfo) -> Result<Vec<u8>> {
        Ok(fs::read(self.segment_path(segment))?)
    }

    fn create(&self, starting_count: u64) -> Result<Box<dyn PageSink>> {
        // Two segments created within the same millisecond collide on name.
        let mut attempts = 0;
        loop {
            let name = segment_name(starting_count, Utc::now());
            let path = self.dir.join(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    info!(segment = %name, starting_count, "Segment created");
                    return Ok(Box::new(FileSegment {
                        file,
                        name,
                        sync_on_flush: self.sync_on_flush,
                    }));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempts < 3 => {
                    attempts += 1;
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn acquire_writer(&self, config: &StoreConfig) -> Result<Box<dyn WriterGuard>> {
        let lock = FileLock::acquire(self.dir.join(&config.lock_file_name))?;
        Ok(Box::new(lock))
    }

    fn describe(&self) -> String {
        format!("directory {}", self.dir.display())
    }
}

struct FileSegment {
    file: File,
    name: String,
    sync_on_flush: bool,
}

impl PageSink for FileSegment {
    fn write_pages(&mut self, offset: u64, block: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(block)?;
        if self.sync_on_flush {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Page blobs
// ---------------------------------------------------------------------------

type Blob = Arc<Mutex<Vec<u8>>>;

/// In-process page blob container.
///
/// Every blob has a fixed, zero-initialised capacity and only accepts writes
/// aligned to the page size. Clones share the same container and lease
/// service, so two clones behave like two processes pointed at one account.
#[derive(Clone)]
pub struct PageBlobStore {
    container: String,
    blobs: Arc<RwLock<BTreeMap<String, Blob>>>,
    leases: Arc<dyn LeaseProvider>,
    page_size: usize,
    blob_capacity: u64,
}

impl PageBlobStore {
    pub fn new(
        container: impl Into<String>,
        leases: Arc<dyn LeaseProvider>,
        config: &StoreConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            container: container.into(),
            blobs: Arc::new(RwLock::new(BTreeMap::new())),
            leases,
            page_size: config.page_size,
            blob_capacity: config.segment_capacity,
        })
    }

    pub fn lock_resource(&self) -> String {
        format!("{}/lock", self.container)
    }

    /// Overwrites raw bytes of a blob, bypassing alignment. Simulates damage.
    pub fn overwrite(&self, name: &str, offset: usize, bytes: &[u8]) -> Result<()> {
        let blob = self
            .blobs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::InvalidSegmentName(name.to_string()))?;
        let mut data = blob.lock();
        let end = offset + bytes.len();
        if end > data.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "write beyond end of blob").into());
        }
        data[offset..end].copy_from_slice(bytes);
        Ok(())
    }
}

impl SegmentStore for PageBlobStore {
    fn list(&self) -> Result<Vec<SegmentInfo>> {
        let blobs = self.blobs.read();
        let mut segments = Vec::with_capacity(blobs.len());
        for (name, blob) in blobs.iter() {
            segments.push(SegmentInfo {
                name: name.clone(),
                starting_count: parse_segment_name(name)?,
                len: blob.lock().len() as u64,
            });
        }
        sort_segments(&mut segments);
        Ok(segments)
    }

    fn read(&self, segment: &SegmentInfo) -> Result<Vec<u8>> {
        let blob = self
            .blobs
            .read()
            .get(&segment.name)
            .cloned()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("blob {} not found", segment.name))
            })?;
        let data = blob.lock().clone();
        Ok(data)
    }

    fn create(&self, starting_count: u64) -> Result<Box<dyn PageSink>> {
        let mut blobs = self.blobs.write();
        let mut created_at = Utc::now();
        let mut name = segment_name(starting_count, created_at);
        while blobs.contains_key(&name) {
            created_at += chrono::Duration::milliseconds(1);
            name = segment_name(starting_count, created_at);
        }

        let blob: Blob = Arc::new(Mutex::new(vec![0u8; self.blob_capacity as usize]));
        blobs.insert(name.clone(), Arc::clone(&blob));
        info!(container = %self.container, blob = %name, starting_count, "Page blob created");

        Ok(Box::new(BlobSegment {
            blob,
            name,
            page_size: self.page_size,
        }))
    }

    fn acquire_writer(&self, config: &StoreConfig) -> Result<Box<dyn WriterGuard>> {
        let lease = AutoRenewLease::acquire(
            Arc::clone(&self.leases),
            self.lock_resource(),
            &config.lease,
        )?;
        Ok(Box::new(lease))
    }

    fn describe(&self) -> String {
        format!("page blob container {}", self.container)
    }
}

struct BlobSegment {
    blob: Blob,
    name: String,
    page_size: usize,
}

impl PageSink for BlobSegment {
    fn write_pages(&mut self, offset: u64, block: &[u8]) -> Result<()> {
        let page = self.page_size as u64;
        if offset % page != 0 || block.len() as u64 % page != 0 {
            return Err(StoreError::Unaligned {
                offset,
                len: block.len(),
                page_size: self.page_size,
            });
        }

        let mut data = self.blob.lock();
        let start = offset as usize;
        let end = start + block.len();
        if end > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("page range {}..{} beyond blob of {} bytes", start, end, data.len()),
            )
            .into());
        }
        data[start..end].copy_from_slice(block);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
