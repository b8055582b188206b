// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types for the event layer.

use std::fmt;

use tapestream::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventStoreError<E: fmt::Debug> {
    /// The stream moved on since it was loaded. Carries what is actually
    /// stored so the caller can decide whether the change overlaps.
    #[error("Expected version {expected} in stream '{identity}' but got {actual}")]
    OptimisticConcurrency {
        expected: u64,
        actual: u64,
        identity: String,
        actual_events: Vec<E>,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Failed to serialize events: {0}")]
    Serialization(String),

    #[error("Failed to decode record {version} of stream '{stream}': {reason}")]
    Deserialization {
        stream: String,
        version: u64,
        reason: String,
    },
}

impl<E: fmt::Debug> EventStoreError<E> {
    pub fn is_concurrency(&self) -> bool {
        matches!(self, EventStoreError::OptimisticConcurrency { .. })
    }

    /// The server version carried by a concurrency failure.
    pub fn actual_version(&self) -> Option<u64> {
        match self {
            EventStoreError::OptimisticConcurrency { actual, .. } => Some(*actual),
            _ => None,
        }
    }
}

pub type Result<T, E> = std::result::Result<T, EventStoreError<E>>;

/// Failure of one aggregate update.
#[derive(Error, Debug)]
pub enum CommitError<E: fmt::Debug, D: fmt::Debug + fmt::Display> {
    /// The command itself was rejected. Nothing was appended.
    #[error("Command rejected: {0}")]
    Domain(D),

    #[error(transparent)]
    Store(#[from] EventStoreError<E>),

    /// A concurrent writer produced an event of the same kind.
    #[error("Conflict between {pending:?} and {actual:?} (stream at version {actual_version})")]
    Unresolvable {
        pending: E,
        actual: E,
        actual_version: u64,
    },
}

impl<E: fmt::Debug, D: fmt::Debug + fmt::Display> CommitError<E, D> {
    pub fn domain(&self) -> Option<&D> {
        match self {
            CommitError::Domain(d) => Some(d),
            _ => None,
        }
    }
}
