// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Reference aggregate: a billing customer.
//!
//! Exercises the replay/commit protocol end to end. Rules are small on purpose:
//! a welcome bonus on creation, balances moved by payments and charges, and a
//! lock once the balance falls below the overdraft threshold.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::aggregate::{update, Aggregate, Changes, CommitOutcome, ConflictPolicy, DomainEvent};
use crate::error::{CommitError, EventStoreError};
use crate::identity::Identity;
use crate::store::EventStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub u64);

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "customer-{}", self.0)
    }
}

impl Identity for CustomerId {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    Eur,
    Usd,
    Rur,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
            Currency::Rur => "RUR",
        };
        f.write_str(code)
    }
}

/// Money in minor units (cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    pub minor: i64,
    pub currency: Currency,
}

impl Amount {
    pub fn new(minor: i64, currency: Currency) -> Self {
        Self { minor, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    /// Whole euros. Saturates at the `i64` range of minor units.
    pub fn eur(units: i64) -> Self {
        Self::new(units.saturating_mul(100), Currency::Eur)
    }

    pub fn checked_add(self, other: Amount) -> Result<Amount, CustomerError> {
        self.same_currency(other)?;
        let minor = self.minor.checked_add(other.minor).ok_or(CustomerError::Overflow)?;
        Ok(Amount::new(minor, self.currency))
    }

    pub fn checked_sub(self, other: Amount) -> Result<Amount, CustomerError> {
        self.same_currency(other)?;
        let minor = self.minor.checked_sub(other.minor).ok_or(CustomerError::Overflow)?;
        Ok(Amount::new(minor, self.currency))
    }

    pub fn is_below(self, other: Amount) -> Result<bool, CustomerError> {
        self.same_currency(other)?;
        Ok(self.minor < other.minor)
    }

    fn same_currency(self, other: Amount) -> Result<(), CustomerError> {
        if self.currency != other.currency {
            return Err(CustomerError::CurrencyMismatch {
                expected: self.currency,
                actual: other.currency,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.minor < 0 { "-" } else { "" };
        let abs = self.minor.unsigned_abs();
        write!(f, "{}{}.{:02} {}", sign, abs / 100, abs % 100, self.currency)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CustomerError {
    #[error("Customer {0} was already created")]
    AlreadyCreated(CustomerId),

    #[error("Customer does not exist")]
    NotCreated,

    #[error("Currency {0} is not supported by pricing")]
    UnsupportedCurrency(Currency),

    #[error("Expected an amount in {expected} but got {actual}")]
    CurrencyMismatch { expected: Currency, actual: Currency },

    #[error("Balance or transaction counter out of range")]
    Overflow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CustomerEvent {
    Created {
        id: CustomerId,
        name: String,
        currency: Currency,
        manual_billing: bool,
        at: DateTime<Utc>,
    },
    Renamed {
        id: CustomerId,
        name: String,
        old_name: String,
        at: DateTime<Utc>,
    },
    Locked {
        id: CustomerId,
        reason: String,
    },
    PaymentAdded {
        id: CustomerId,
        name: String,
        payment: Amount,
        new_balance: Amount,
        transaction: u32,
        at: DateTime<Utc>,
    },
    ChargeAdded {
        id: CustomerId,
        name: String,
        charge: Amount,
        new_balance: Amount,
        transaction: u32,
        at: DateTime<Utc>,
    },
}

impl DomainEvent for CustomerEvent {
    fn kind(&self) -> &'static str {
        match self {
            CustomerEvent::Created { .. } => "CustomerCreated",
            CustomerEvent::Renamed { .. } => "CustomerRenamed",
            CustomerEvent::Locked { .. } => "CustomerLocked",
            CustomerEvent::PaymentAdded { .. } => "CustomerPaymentAdded",
            CustomerEvent::ChargeAdded { .. } => "CustomerChargeAdded",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Customer {
    pub id: Option<CustomerId>,
    pub name: String,
    pub created: bool,
    pub locked: bool,
    pub manual_billing: bool,
    pub currency: Option<Currency>,
    pub balance: Option<Amount>,
    pub max_transaction: u32,
}

impl Aggregate for Customer {
    type Event = CustomerEvent;

    fn apply(self, event: &CustomerEvent) -> Self {
        match event {
            CustomerEvent::Created {
                id,
                name,
                currency,
                manual_billing,
                ..
            } => Customer {
                id: Some(*id),
                name: name.clone(),
                created: true,
                manual_billing: *manual_billing,
                currency: Some(*currency),
                balance: Some(Amount::zero(*currency)),
                ..self
            },
            CustomerEvent::Renamed { name, .. } => Customer {
                name: name.clone(),
                ..self
            },
            CustomerEvent::Locked { .. } => Customer {
                locked: true,
                ..self
            },
            CustomerEvent::PaymentAdded {
                new_balance,
                transaction,
                ..
            }
            | CustomerEvent::ChargeAdded {
                new_balance,
                transaction,
                ..
            } => Customer {
                balance: Some(*new_balance),
                max_transaction: *transaction,
                ..self
            },
        }
    }
}

/// Prices that depend on the customer's currency.
pub trait PricingService {
    fn overdraft_threshold(&self, currency: Currency) -> Result<Amount, CustomerError>;

    fn welcome_bonus(&self, currency: Currency) -> Result<Amount, CustomerError>;
}

/// Euro-only pricing: 15 EUR bonus, lock below -10 EUR.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuroPricing;

impl PricingService for EuroPricing {
    fn overdraft_threshold(&self, currency: Currency) -> Result<Amount, CustomerError> {
        match currency {
            Currency::Eur => Ok(Amount::eur(-10)),
            other => Err(CustomerError::UnsupportedCurrency(other)),
        }
    }

    fn welcome_bonus(&self, currency: Currency) -> Result<Amount, CustomerError> {
        match currency {
            Currency::Eur => Ok(Amount::eur(15)),
            other => Err(CustomerError::UnsupportedCurrency(other)),
        }
    }
}

impl Changes<Customer> {
    pub fn create(
        &mut self,
        id: CustomerId,
        name: &str,
        currency: Currency,
        manual_billing: bool,
        pricing: &dyn PricingService,
    ) -> Result<(), CustomerError> {
        if self.state().created {
            return Err(CustomerError::AlreadyCreated(id));
        }
        let bonus = pricing.welcome_bonus(currency)?;

        self.record(CustomerEvent::Created {
            id,
            name: name.to_string(),
            currency,
            manual_billing,
            at: Utc::now(),
        });
        self.add_payment("Welcome bonus", bonus)
    }

    pub fn rename(&mut self, name: &str) -> Result<(), CustomerError> {
        let id = self.existing()?;
        if self.state().name == name {
            return Ok(());
        }
        let old_name = self.state().name.clone();
        self.record(CustomerEvent::Renamed {
            id,
            name: name.to_string(),
            old_name,
            at: Utc::now(),
        });
        Ok(())
    }

    pub fn lock(&mut self, reason: &str) -> Result<(), CustomerError> {
        let id = self.existing()?;
        if self.state().locked {
            return Ok(());
        }
        self.record(CustomerEvent::Locked {
            id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    pub fn lock_for_overdraft(
        &mut self,
        comment: &str,
        pricing: &dyn PricingService,
    ) -> Result<(), CustomerError> {
        self.existing()?;
        if self.state().manual_billing {
            return Ok(());
        }
        let balance = self.balance()?;
        let threshold = pricing.overdraft_threshold(balance.currency)?;
        if balance.is_below(threshold)? {
            return self.lock(&format!("Overdraft. {}", comment));
        }
        Ok(())
    }

    pub fn add_payment(&mut self, name: &str, amount: Amount) -> Result<(), CustomerError> {
        let id = self.existing()?;
        let new_balance = self.balance()?.checked_add(amount)?;
        let transaction = self.next_transaction()?;
        self.record(CustomerEvent::PaymentAdded {
            id,
            name: name.to_string(),
            payment: amount,
            new_balance,
            transaction,
            at: Utc::now(),
        });
        Ok(())
    }

    pub fn charge(&mut self, name: &str, amount: Amount) -> Result<(), CustomerError> {
        let id = self.existing()?;
        let new_balance = self.balance()?.checked_sub(amount)?;
        let transaction = self.next_transaction()?;
        self.record(CustomerEvent::ChargeAdded {
            id,
            name: name.to_string(),
            charge: amount,
            new_balance,
            transaction,
            at: Utc::now(),
        });
        Ok(())
    }

    fn existing(&self) -> Result<CustomerId, CustomerError> {
        match (self.state().created, self.state().id) {
            (true, Some(id)) => Ok(id),
            _ => Err(CustomerError::NotCreated),
        }
    }

    fn next_transaction(&self) -> Result<u32, CustomerError> {
        self.state()
            .max_transaction
            .checked_add(1)
            .ok_or(CustomerError::Overflow)
    }

    fn balance(&self) -> Result<Amount, CustomerError> {
        self.state()
            .balance
            .ok_or(CustomerError::NotCreated)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CustomerCommand {
    Create {
        id: CustomerId,
        name: String,
        currency: Currency,
        manual_billing: bool,
    },
    Rename {
        id: CustomerId,
        name: String,
    },
    Lock {
        id: CustomerId,
        reason: String,
    },
    LockForOverdraft {
        id: CustomerId,
        comment: String,
    },
    AddPayment {
        id: CustomerId,
        name: String,
        amount: Amount,
    },
    Charge {
        id: CustomerId,
        name: String,
        amount: Amount,
    },
}

impl CustomerCommand {
    pub fn id(&self) -> CustomerId {
        match self {
            CustomerCommand::Create { id, .. }
            | CustomerCommand::Rename { id, .. }
            | CustomerCommand::Lock { id, .. }
            | CustomerCommand::LockForOverdraft { id, .. }
            | CustomerCommand::AddPayment { id, .. }
            | CustomerCommand::Charge { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CustomerCommand::Create { .. } => "CreateCustomer",
            CustomerCommand::Rename { .. } => "RenameCustomer",
            CustomerCommand::Lock { .. } => "LockCustomer",
            CustomerCommand::LockForOverdraft { .. } => "LockCustomerForAccountOverdraft",
            CustomerCommand::AddPayment { .. } => "AddCustomerPayment",
            CustomerCommand::Charge { .. } => "ChargeCustomer",
        }
    }
}

pub type CustomerResult<T> = Result<T, CommitError<CustomerEvent, CustomerError>>;

/// Runs customer commands through the commit protocol and logs each one.
pub struct CustomerService<P: PricingService> {
    events: EventStore<CustomerEvent>,
    pricing: P,
    policy: ConflictPolicy,
}

impl<P: PricingService> CustomerService<P> {
    pub fn new(events: EventStore<CustomerEvent>, pricing: P) -> Self {
        Self {
            events,
            pricing,
            policy: ConflictPolicy::Fail,
        }
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn events(&self) -> &EventStore<CustomerEvent> {
        &self.events
    }

    pub fn execute(&self, command: CustomerCommand) -> CustomerResult<CommitOutcome> {
        let id = command.id();
        let kind = command.kind();
        info!(customer = %id, command = kind, "Executing command");

        let pricing: &dyn PricingService = &self.pricing;
        let result = match command {
            CustomerCommand::Create {
                name,
                currency,
                manual_billing,
                ..
            } => self.run(id, |c| c.create(id, &name, currency, manual_billing, pricing)),
            CustomerCommand::Rename { name, .. } => self.run(id, |c| c.rename(&name)),
            CustomerCommand::Lock { reason, .. } => self.run(id, |c| c.lock(&reason)),
            CustomerCommand::LockForOverdraft { comment, .. } => {
                self.run(id, |c| c.lock_for_overdraft(&comment, pricing))
            }
            CustomerCommand::AddPayment { name, amount, .. } => {
                self.run(id, |c| c.add_payment(&name, amount))
            }
            CustomerCommand::Charge { name, amount, .. } => {
                self.run(id, |c| c.charge(&name, amount))
            }
        };

        match &result {
            Ok(outcome) => info!(
                customer = %id,
                command = kind,
                version = outcome.version,
                appended = outcome.appended,
                retries = outcome.retries,
                "Command committed"
            ),
            Err(e) => warn!(customer = %id, command = kind, error = %e, "Command failed"),
        }
        result
    }

    /// Current state of a customer and the version it was read at.
    pub fn load(&self, id: CustomerId) -> Result<(Customer, u64), EventStoreError<CustomerEvent>> {
        let stream = self.events.load(&id)?;
        Ok((Customer::from_history(&stream.events), stream.version))
    }

    fn run<F>(&self, id: CustomerId, execute: F) -> CustomerResult<CommitOutcome>
    where
        F: FnOnce(&mut Changes<Customer>) -> Result<(), CustomerError>,
    {
        update::<Customer, _, _, _>(&self.events, &id, self.policy, execute)
    }
}
