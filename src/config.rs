use std::time::Duration;

use crate::error::{Result, StoreError};

/// Page size of the underlying sink (bytes).
pub const DEFAULT_PAGE_SIZE: usize = 512;

/// Maximum size of one segment (bytes).
pub const DEFAULT_SEGMENT_CAPACITY: u64 = 512 * 1024;

/// Configuration for an append-only store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Alignment unit of every flush (default: 512)
    pub page_size: usize,

    /// Maximum bytes per segment before rolling over (default: 512KB)
    pub segment_capacity: u64,

    /// fsync segment files after every flush (default: true)
    pub sync_on_flush: bool,

    /// Name of the lock marker inside a store directory (default: "lock")
    pub lock_file_name: String,

    /// Lease settings for stores guarded by an external lease
    pub lease: LeaseConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
            sync_on_flush: true,
            lock_file_name: "lock".to_string(),
            lease: LeaseConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    pub fn segment_capacity(mut self, capacity: u64) -> Self {
        self.segment_capacity = capacity;
        self
    }

    pub fn sync_on_flush(mut self, enabled: bool) -> Self {
        self.sync_on_flush = enabled;
        self
    }

    pub fn lock_file_name(mut self, name: impl Into<String>) -> Self {
        self.lock_file_name = name.into();
        self
    }

    pub fn lease(mut self, lease: LeaseConfig) -> Self {
        self.lease = lease;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(StoreError::InvalidConfig("page size must be positive".into()));
        }
        if self.segment_capacity == 0 || self.segment_capacity % self.page_size as u64 != 0 {
            return Err(StoreError::InvalidConfig(format!(
                "segment capacity {} is not a positive multiple of page size {}",
                self.segment_capacity, self.page_size
            )));
        }
        // Record lengths are framed as u32.
        if self.segment_capacity > u32::MAX as u64 {
            return Err(StoreError::InvalidConfig(format!(
                "segment capacity {} exceeds {}",
                self.segment_capacity,
                u32::MAX
            )));
        }
        if self.lock_file_name.is_empty() {
            return Err(StoreError::InvalidConfig("lock file name is empty".into()));
        }
        self.lease.validate()
    }
}

/// Timing of lease acquisition and renewal.
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// Lease lifetime requested from the provider (default: 60s)
    pub duration: Duration,

    /// Period of the background renewal (default: 40s)
    pub renew_interval: Duration,

    /// Acquisition attempts before giving up (default: 5)
    pub acquire_attempts: u32,

    /// Fixed pause between acquisition attempts (default: 1s)
    pub acquire_backoff: Duration,

    /// Tries per renewal tick before the lease is declared lost (default: 3)
    pub renew_attempts: u32,

    /// Pause between renewal tries within one tick (default: 500ms)
    pub renew_backoff: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60),
            renew_interval: Duration::from_secs(40),
            acquire_attempts: 5,
            acquire_backoff: Duration::from_secs(1),
            renew_attempts: 3,
            renew_backoff: Duration::from_millis(500),
        }
    }
}

impl LeaseConfig {
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    pub fn acquire_attempts(mut self, attempts: u32) -> Self {
        self.acquire_attempts = attempts;
        self
    }

    pub fn acquire_backoff(mut self, backoff: Duration) -> Self {
        self.acquire_backoff = backoff;
        self
    }

    pub fn renew_attempts(mut self, attempts: u32) -> Self {
        self.renew_attempts = attempts;
        self
    }

    pub fn renew_backoff(mut self, backoff: Duration) -> Self {
        self.renew_backoff = backoff;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.renew_interval >= self.duration {
            return Err(StoreError::InvalidConfig(format!(
                "lease renewal interval {:?} must be shorter than lease duration {:?}",
                self.renew_interval, self.duration
            )));
        }
        if self.acquire_attempts == 0 || self.renew_attempts == 0 {
            return Err(StoreError::InvalidConfig("lease attempts must be positive".into()));
        }
        Ok(())
    }
}
