// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types for the storage core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::lease::LeaseError;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The caller's expected stream version did not match. Nothing was written.
    #[error("Expected version {expected} in stream '{stream}' but got {actual}")]
    Concurrency {
        expected: u64,
        actual: u64,
        stream: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Store is closed")]
    Closed,

    #[error("Store was opened read-only")]
    ReadOnly,

    #[error("Record of {size} bytes does not fit a segment of {capacity} bytes")]
    RecordTooLarge { size: usize, capacity: u64 },

    #[error("Store at {path:?} is locked by another writer: {source}")]
    Locked {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to acquire ownership of '{resource}' after {attempts} attempts")]
    LeaseAcquisition { resource: String, attempts: u32 },

    #[error("Lease on '{resource}' lost: {reason}")]
    LeaseLost { resource: String, reason: String },

    #[error("Lease error: {0}")]
    Lease(#[from] LeaseError),

    #[error("Unaligned page write: offset {offset}, len {len}, page size {page_size}")]
    Unaligned {
        offset: u64,
        len: usize,
        page_size: usize,
    },

    #[error("Invalid segment name: {0}")]
    InvalidSegmentName(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    pub fn is_concurrency(&self) -> bool {
        matches!(self, StoreError::Concurrency { .. })
    }

    /// Errors after which the store instance must not be used again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_)
                | StoreError::Closed
                | StoreError::LeaseLost { .. }
                | StoreError::Lease(_)
                | StoreError::Unaligned { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
