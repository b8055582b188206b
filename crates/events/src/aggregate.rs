// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Aggregate replay and commit.
//!
//! Every command follows the same sequence:
//!
//! 1. load the aggregate's stream (version `v`)
//! 2. fold the events into a fresh state
//! 3. run one command, which records zero or more new events
//! 4. append them with expected version `v`
//!
//! With [`ConflictPolicy::ResolveDisjoint`] a concurrency failure is inspected:
//! if no event in the stream as the server holds it has the same kind as a
//! pending one, the batch is appended again at the server's version.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tapestream::ExpectedVersion;
use tracing::{debug, info, warn};

use crate::error::{CommitError, EventStoreError};
use crate::identity::Identity;
use crate::store::EventStore;

pub trait DomainEvent: Serialize + DeserializeOwned + Clone + fmt::Debug {
    /// Name of the variant. Two events conflict when their kinds match.
    fn kind(&self) -> &'static str;
}

/// State rebuilt from a stream by a pure left fold.
pub trait Aggregate: Default {
    type Event: DomainEvent;

    /// Returns the state after `event`. One match arm per event kind.
    fn apply(self, event: &Self::Event) -> Self;

    fn from_history(events: &[Self::Event]) -> Self {
        events.iter().fold(Self::default(), |state, event| state.apply(event))
    }
}

/// Aggregate state plus the events a command has produced so far.
#[derive(Debug)]
pub struct Changes<A: Aggregate> {
    state: A,
    pending: Vec<A::Event>,
}

impl<A: Aggregate> Changes<A> {
    pub fn new(state: A) -> Self {
        Self {
            state,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    /// Applies `event` to the state and queues it for persistence.
    pub fn record(&mut self, event: A::Event) {
        let state = std::mem::take(&mut self.state);
        self.state = state.apply(&event);
        self.pending.push(event);
    }

    pub fn pending(&self) -> &[A::Event] {
        &self.pending
    }

    pub fn into_pending(self) -> Vec<A::Event> {
        self.pending
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Surface every concurrency failure.
    #[default]
    Fail,
    /// Retry disjoint changes at most `max_retries` times.
    ResolveDisjoint { max_retries: u32 },
}

impl ConflictPolicy {
    pub fn resolve_disjoint() -> Self {
        ConflictPolicy::ResolveDisjoint { max_retries: 1 }
    }

    fn max_retries(&self) -> u32 {
        match self {
            ConflictPolicy::Fail => 0,
            ConflictPolicy::ResolveDisjoint { max_retries } => *max_retries,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Stream version after the commit.
    pub version: u64,
    /// Events appended, zero for a no-op command.
    pub appended: usize,
    /// Appends repeated after a disjoint conflict.
    pub retries: u32,
}

/// Loads `id`, runs `execute` against its state and commits the result.
pub fn update<A, I, D, F>(
    store: &EventStore<A::Event>,
    id: &I,
    policy: ConflictPolicy,
    execute: F,
) -> Result<CommitOutcome, CommitError<A::Event, D>>
where
    A: Aggregate,
    I: Identity + ?Sized,
    D: fmt::Debug + fmt::Display,
    F: FnOnce(&mut Changes<A>) -> Result<(), D>,
{
    let stream = store.load(id)?;
    let mut changes = Changes::new(A::from_history(&stream.events));
    execute(&mut changes).map_err(CommitError::Domain)?;
    let pending = changes.into_pending();

    let mut expected = stream.version;
    let mut retries = 0;
    loop {
        let err = match store.append_to_stream(id, ExpectedVersion::Exact(expected), &pending) {
            Ok(version) => {
                return Ok(CommitOutcome {
                    version: version.unwrap_or(expected),
                    appended: pending.len(),
                    retries,
                })
            }
            Err(err) => err,
        };

        // Inspect exactly the stream the failed append was rejected against.
        let (actual, actual_events) = match err {
            EventStoreError::OptimisticConcurrency {
                actual,
                actual_events,
                ..
            } if retries < policy.max_retries() => (actual, actual_events),
            other => return Err(other.into()),
        };

        if let Some((mine, theirs)) = first_overlap(&pending, &actual_events) {
            warn!(
                stream = %id,
                pending = mine.kind(),
                actual = theirs.kind(),
                "Concurrent change of the same kind"
            );
            return Err(CommitError::Unresolvable {
                pending: mine.clone(),
                actual: theirs.clone(),
                actual_version: actual,
            });
        }

        info!(stream = %id, from = expected, to = actual, "Retrying disjoint append");
        retries += 1;
        expected = actual;
    }
}

fn first_overlap<'a, E: DomainEvent>(pending: &'a [E], actual: &'a [E]) -> Option<(&'a E, &'a E)> {
    for mine in pending {
        for theirs in actual {
            if mine.kind() == theirs.kind() {
                debug!(kind = mine.kind(), "Overlapping event kinds");
                return Some((mine, theirs));
            }
        }
    }
    None
}

/// Convenience for callers that only need the rebuilt state.
pub fn load_aggregate<A, I>(store: &EventStore<A::Event>, id: &I) -> Result<(A, u64), EventStoreError<A::Event>>
where
    A: Aggregate,
    I: Identity + ?Sized,
{
    let stream = store.load(id)?;
    Ok((A::from_history(&stream.events), stream.version))
}
