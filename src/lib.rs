// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! tapestream: an append-only, segmented record log with per-stream
//! optimistic concurrency, page-aligned flushing and replay-based recovery.
//!
//! ```no_run
//! use tapestream::{AppendOnlyStore, ExpectedVersion, StoreConfig};
//!
//! # fn main() -> tapestream::Result<()> {
//! let store = AppendOnlyStore::open_directory("./data", StoreConfig::default())?;
//! let version = store.append("customer-12", b"created", ExpectedVersion::Exact(0))?;
//! assert_eq!(version, 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod lease;
pub mod lock;
pub mod page;
pub mod record;
pub mod segment;
pub mod store;
pub mod telemetry;

pub use config::{LeaseConfig, StoreConfig};
pub use error::{Result, StoreError};
pub use index::{GlobalRecord, IndexSnapshot, StreamRecord};
pub use lease::{AutoRenewLease, LeaseError, LeaseProvider, MemoryLeaseProvider};
pub use lock::{FileLock, WriterGuard};
pub use segment::{DirectorySegmentStore, PageBlobStore, SegmentInfo, SegmentStore};
pub use store::{AppendOnlyStore, ExpectedVersion, ReplayReport, TruncatedSegment};
