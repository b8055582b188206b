// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Single-writer exclusivity.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};

/// Proof that this process is the only writer of a store.
///
/// `check` runs before every append; `release` must be idempotent.
pub trait WriterGuard: Send {
    fn check(&self) -> Result<()>;

    fn release(&mut self) -> Result<()>;

    fn describe(&self) -> String;
}

/// Exclusive OS lock on a marker file inside the store directory.
///
/// The marker holds the owner's pid while locked and is emptied on release.
/// The file itself stays, so every contender locks the same inode.
#[derive(Debug)]
pub struct FileLock {
    file: Option<File>,
    path: PathBuf,
}

impl FileLock {
    /// Takes the lock without blocking. Fails with [`StoreError::Locked`]
    /// when another handle already holds it.
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if let Err(source) = file.try_lock_exclusive() {
            warn!(path = ?path, error = %source, "Store is locked by another writer");
            return Err(StoreError::Locked { path, source });
        }

        // Only the holder may rewrite the marker.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        info!(path = ?path, pid = std::process::id(), "Writer lock acquired");
        Ok(Self {
            file: Some(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WriterGuard for FileLock {
    fn check(&self) -> Result<()> {
        if self.file.is_none() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };

        // Clear the pid while still holding the lock.
        if let Err(e) = file.set_len(0) {
            warn!(path = ?self.path, error = %e, "Failed to clear lock marker");
        }
        file.unlock()?;
        debug!(path = ?self.path, "Writer lock released");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file lock {}", self.path.display())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
