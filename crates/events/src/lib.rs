// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! Event-sourcing layer over [`tapestream`]: typed event streams, aggregate
//! replay with optimistic commits, and a sample customer aggregate.

pub mod aggregate;
pub mod customer;
pub mod error;
pub mod identity;
pub mod store;

pub use aggregate::{load_aggregate, update, Aggregate, Changes, CommitOutcome, ConflictPolicy, DomainEvent};
pub use customer::{
    Amount, Currency, Customer, CustomerCommand, CustomerError, CustomerEvent, CustomerId,
    CustomerService, EuroPricing, PricingService,
};
pub use error::{CommitError, EventStoreError};
pub use identity::Identity;
pub use store::{EventStore, EventStream};
