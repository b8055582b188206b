// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Renewable leases for the distributed single-writer protocol.
//!
//! ## How It Works
//!
//! 1. **Acquire**: `AutoRenewLease::acquire` asks the provider for the lease,
//!    retrying a bounded number of times with a fixed backoff.
//! 2. **Renew**: a background thread renews the lease every
//!    `renew_interval`, well inside its expiry.
//! 3. **Fence**: when renewal keeps failing the thread flips an atomic
//!    [`LeaseStatus`] and exits. The store calls `check()` before every append,
//!    so a writer that lost its lease stops writing.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::LeaseConfig;
use crate::error::{Result, StoreError};
use crate::lock::WriterGuard;
use crate::telemetry;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaseError {
    #[error("Lease on '{0}' is held by another owner")]
    Held(String),

    #[error("Lease on '{0}' is not held by this owner")]
    NotHolder(String),

    #[error("Lease on '{0}' has expired")]
    Expired(String),

    #[error("Lease service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(u64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease-{:016x}", self.0)
    }
}

/// External lease service (object-storage leases, a coordination service, ...).
pub trait LeaseProvider: Send + Sync {
    fn acquire(&self, resource: &str, duration: Duration) -> std::result::Result<LeaseId, LeaseError>;

    fn renew(
        &self,
        resource: &str,
        id: LeaseId,
        duration: Duration,
    ) -> std::result::Result<(), LeaseError>;

    fn release(&self, resource: &str, id: LeaseId) -> std::result::Result<(), LeaseError>;
}

#[derive(Debug)]
struct HeldLease {
    id: LeaseId,
    expires_at: Instant,
}

#[derive(Debug)]
struct LeaseTable {
    leases: HashMap<String, HeldLease>,
    next_id: u64,
    available: bool,
}

/// In-process lease service shared by every store handle in the process.
#[derive(Debug)]
pub struct MemoryLeaseProvider {
    table: Mutex<LeaseTable>,
}

impl Default for MemoryLeaseProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLeaseProvider {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LeaseTable {
                leases: HashMap::new(),
                next_id: 1,
                available: true,
            }),
        }
    }

    /// Forcibly ends whatever lease is held on `resource`.
    pub fn break_lease(&self, resource: &str) -> bool {
        self.table.lock().leases.remove(resource).is_some()
    }

    /// Simulates an outage of the lease service.
    pub fn set_available(&self, available: bool) {
        self.table.lock().available = available;
    }

    pub fn holder(&self, resource: &str) -> Option<LeaseId> {
        let table = self.table.lock();
        table
            .leases
            .get(resource)
            .filter(|held| held.expires_at > Instant::now())
            .map(|held| held.id)
    }
}

impl LeaseProvider for MemoryLeaseProvider {
    fn acquire(&self, resource: &str, duration: Duration) -> std::result::Result<LeaseId, LeaseError> {
        let mut table = self.table.lock();
        if !table.available {
            return Err(LeaseError::Unavailable(resource.to_string()));
        }

        let now = Instant::now();
        if let Some(held) = table.leases.get(resource) {
            if held.expires_at > now {
                return Err(LeaseError::Held(resource.to_string()));
            }
        }

        let id = LeaseId(table.next_id);
        table.next_id += 1;
        table.leases.insert(
            resource.to_string(),
            HeldLease {
                id,
                expires_at: now + duration,
            },
        );
        Ok(id)
    }

    fn renew(
        &self,
        resource: &str,
        id: LeaseId,
        duration: Duration,
    ) -> std::result::Result<(), LeaseError> {
        let mut table = self.table.lock();
        if !table.available {
            return Err(LeaseError::Unavailable(resource.to_string()));
        }

        let now = Instant::now();
        let expired = match table.leases.get_mut(resource) {
            Some(held) if held.id == id => {
                if held.expires_at > now {
                    held.expires_at = now + duration;
                    return Ok(());
                }
                true
            }
            _ => false,
        };

        if expired {
            table.leases.remove(resource);
            return Err(LeaseError::Expired(resource.to_string()));
        }
        Err(LeaseError::NotHolder(resource.to_string()))
    }

    fn release(&self, resource: &str, id: LeaseId) -> std::result::Result<(), LeaseError> {
        let mut table = self.table.lock();
        match table.leases.get(resource) {
            Some(held) if held.id == id => {
                table.leases.remove(resource);
                Ok(())
            }
            _ => Err(LeaseError::NotHolder(resource.to_string())),
        }
    }
}

/// Renewal health shared between the writer and the renewal thread.
#[derive(Debug, Default)]
pub struct LeaseStatus {
    lost: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl LeaseStatus {
    fn mark_lost(&self, reason: String) {
        *self.reason.lock() = Some(reason);
        self.lost.store(true, Ordering::Release);
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

/// A lease held for the lifetime of a writer and renewed in the background.
pub struct AutoRenewLease {
    resource: String,
    id: LeaseId,
    provider: Arc<dyn LeaseProvider>,
    status: Arc<LeaseStatus>,
    stop: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    released: bool,
}

impl AutoRenewLease {
    pub fn acquire(
        provider: Arc<dyn LeaseProvider>,
        resource: impl Into<String>,
        config: &LeaseConfig,
    ) -> Result<Self> {
        let resource = resource.into();
        let attempts = config.acquire_attempts;

        for attempt in 1..=attempts {
            match provider.acquire(&resource, config.duration) {
                Ok(id) => {
                    info!(
                        resource = %resource,
                        lease = %id,
                        attempt,
                        duration_seconds = config.duration.as_secs(),
                        "Lease acquired"
                    );
                    return Self::start(provider, resource, id, config);
                }
                Err(e) => {
                    warn!(resource = %resource, attempt, error = %e, "Lease acquisition failed");
                    if attempt < attempts {
                        thread::sleep(config.acquire_backoff);
                    }
                }
            }
        }

        error!(resource = %resource, attempts, "Giving up on lease acquisition");
        Err(StoreError::LeaseAcquisition { resource, attempts })
    }

    fn start(
        provider: Arc<dyn LeaseProvider>,
        resource: String,
        id: LeaseId,
        config: &LeaseConfig,
    ) -> Result<Self> {
        let status = Arc::new(LeaseStatus::default());
        let (stop_tx, stop_rx) = mpsc::channel();

        let task = RenewalTask {
            resource: resource.clone(),
            id,
            provider: Arc::clone(&provider),
            status: Arc::clone(&status),
            duration: config.duration,
            interval: config.renew_interval,
            attempts: config.renew_attempts,
            backoff: config.renew_backoff,
        };

        let spawned = thread::Builder::new()
            .name(format!("lease-renew-{}", resource))
            .spawn(move || task.run(stop_rx));

        let worker = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let _ = provider.release(&resource, id);
                return Err(StoreError::Io(e));
            }
        };

        debug!(
            resource = %resource,
            interval_seconds = config.renew_interval.as_secs(),
            "Lease renewal task started"
        );

        Ok(Self {
            resource,
            id,
            provider,
            status,
            stop: Some(stop_tx),
            worker: Some(worker),
            released: false,
        })
    }

    pub fn id(&self) -> LeaseId {
        self.id
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn status(&self) -> &Arc<LeaseStatus> {
        &self.status
    }

    fn stop_renewal(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(resource = %self.resource, "Lease renewal thread panicked");
            }
        }
    }
}

impl WriterGuard for AutoRenewLease {
    fn check(&self) -> Result<()> {
        if self.released {
            return Err(StoreError::Closed);
        }
        if self.status.is_lost() {
            return Err(StoreError::LeaseLost {
                resource: self.resource.clone(),
                reason: self
                    .status
                    .reason()
                    .unwrap_or_else(|| "renewal failed".to_string()),
            });
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.stop_renewal();

        if self.status.is_lost() {
            debug!(resource = %self.resource, "Lease already lost, nothing to release");
            return Ok(());
        }

        match self.provider.release(&self.resource, self.id) {
            Ok(()) => {
                info!(resource = %self.resource, lease = %self.id, "Lease released");
                Ok(())
            }
            Err(e) => {
                warn!(resource = %self.resource, error = %e, "Lease release failed");
                Err(e.into())
            }
        }
    }

    fn describe(&self) -> String {
        format!("lease {} on {}", self.id, self.resource)
    }
}

impl Drop for AutoRenewLease {
    fn drop(&mut self) {
        let _ = WriterGuard::release(self);
    }
}

struct RenewalTask {
    resource: String,
    id: LeaseId,
    provider: Arc<dyn LeaseProvider>,
    status: Arc<LeaseStatus>,
    duration: Duration,
    interval: Duration,
    attempts: u32,
    backoff: Duration,
}

impl RenewalTask {
    fn run(self, stop: mpsc::Receiver<()>) {
        loop {
            if should_stop(&stop, self.interval) {
                return;
            }

            let mut last_error = None;
            for attempt in 1..=self.attempts {
                match self.provider.renew(&self.resource, self.id, self.duration) {
                    Ok(()) => {
                        debug!(resource = %self.resource, attempt, "Lease renewed");
                        last_error = None;
                        break;
                    }
                    Err(e) => {
                        warn!(resource = %self.resource, attempt, error = %e, "Lease renewal failed");
                        metrics::counter!(telemetry::LEASE_RENEWAL_FAILURES_TOTAL, 1);
                        // Neither retrying nor waiting helps once someone else owns it.
                        let fatal = matches!(e, LeaseError::NotHolder(_) | LeaseError::Expired(_));
                        last_error = Some(e);
                        if fatal {
                            break;
                        }
                        if attempt < self.attempts && should_stop(&stop, self.backoff) {
                            return;
                        }
                    }
                }
            }

            if let Some(e) = last_error {
                error!(resource = %self.resource, error = %e, "Lease lost, writer fenced");
                self.status.mark_lost(e.to_string());
                return;
            }
        }
    }
}

/// Waits up to `timeout` for a stop signal.
fn should_stop(stop: &mpsc::Receiver<()>, timeout: Duration) -> bool {
    match stop.recv_timeout(timeout) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        Err(RecvTimeoutError::Timeout) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> LeaseConfig {
        LeaseConfig::default()
            .duration(Duration::from_millis(300))
            .renew_interval(Duration::from_millis(50))
            .acquire_attempts(2)
            .acquire_backoff(Duration::from_millis(10))
            .renew_attempts(2)
            .renew_backoff(Duration::from_millis(10))
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_memory_provider_exclusive() {
        let provider = MemoryLeaseProvider::new();
        let id = provider.acquire("blob", Duration::from_secs(10)).unwrap();
        assert_eq!(
            provider.acquire("blob", Duration::from_secs(10)),
            Err(LeaseError::Held("blob".into()))
        );
        assert!(provider.renew("blob", id, Duration::from_secs(10)).is_ok());

        provider.release("blob", id).unwrap();
        assert!(provider.acquire("blob", Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn test_expired_lease_can_be_taken() {
        let provider = MemoryLeaseProvider::new();
        let stale = provider.acquire("blob", Duration::from_millis(1)).unwrap();
        thread::sleep(Duration::from_millis(5));

        let fresh = provider.acquire("blob", Duration::from_secs(10)).unwrap();
        assert_ne!(stale, fresh);
        assert_eq!(
            provider.renew("blob", stale, Duration::from_secs(10)),
            Err(LeaseError::NotHolder("blob".into()))
        );
    }

    #[test]
    fn test_acquire_gives_up_after_attempts() {
        let provider = Arc::new(MemoryLeaseProvider::new());
        let _other = provider.acquire("blob", Duration::from_secs(10)).unwrap();

        let result = AutoRenewLease::acquire(provider, "blob", &fast_config());
        match result {
            Err(StoreError::LeaseAcquisition { resource, attempts }) => {
                assert_eq!(resource, "blob");
                assert_eq!(attempts, 2);
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("lease should be held elsewhere"),
        }
    }

    #[test]
    fn test_renewal_keeps_lease_alive() {
        let provider = Arc::new(MemoryLeaseProvider::new());
        let lease = AutoRenewLease::acquire(provider.clone(), "blob", &fast_config()).unwrap();

        // Several lease durations pass; renewal keeps it ours.
        thread::sleep(Duration::from_millis(700));
        assert!(lease.check().is_ok());
        assert_eq!(provider.holder("blob"), Some(lease.id()));
    }

    #[test]
    fn test_broken_lease_fences_writer() {
        let provider = Arc::new(MemoryLeaseProvider::new());
        let lease = AutoRenewLease::acquire(provider.clone(), "blob", &fast_config()).unwrap();
        assert!(provider.break_lease("blob"));

        assert!(wait_until(|| lease.status().is_lost()));
        assert!(matches!(lease.check(), Err(StoreError::LeaseLost { .. })));
    }

    #[test]
    fn test_outage_fences_writer() {
        let provider = Arc::new(MemoryLeaseProvider::new());
        let lease = AutoRenewLease::acquire(provider.clone(), "blob", &fast_config()).unwrap();
        provider.set_available(false);

        assert!(wait_until(|| lease.status().is_lost()));
        let reason = lease.status().reason().unwrap();
        assert!(reason.contains("unavailable"));
    }

    #[test]
    fn test_release_is_idempotent_and_frees_resource() {
        let provider = Arc::new(MemoryLeaseProvider::new());
        let mut lease = AutoRenewLease::acquire(provider.clone(), "blob", &fast_config()).unwrap();

        lease.release().unwrap();
        lease.release().unwrap();
        assert_eq!(provider.holder("blob"), None);
        assert!(matches!(lease.check(), Err(StoreError::Closed)));
    }
}
