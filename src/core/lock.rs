//! Host-wide advisory lock
//!
//! The firewall table is global state. Two nfsinkhole processes racing
//! between `iptables -S` and the mutation that follows can both pass the same
//! precondition check, so the CLI serialises whole operations on a `flock`.

use crate::core::error::{Error, Result};
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_LOCK_FILE: &str = "/run/lock/nfsinkhole.lock";

/// Lock file path, honouring `NFSINKHOLE_LOCK_FILE`
pub fn lock_path() -> PathBuf {
    std::env::var_os("NFSINKHOLE_LOCK_FILE")
        .filter(|p| !p.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_LOCK_FILE), PathBuf::from)
}

/// Exclusive lock held until dropped
#[derive(Debug)]
pub struct HostLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl HostLock {
    /// Blocks until the exclusive lock on `path` is held
    ///
    /// # Errors
    ///
    /// Returns `Error::Lock` if the file cannot be opened or locked.
    pub fn acquire(path: &Path) -> Result<Self> {
        Self::lock(path, FlockArg::LockExclusive)
    }

    /// Takes the lock only if nobody else holds it
    ///
    /// # Errors
    ///
    /// Returns `Error::Lock` if the lock is held elsewhere or the file cannot
    /// be opened.
    pub fn try_acquire(path: &Path) -> Result<Self> {
        Self::lock(path, FlockArg::LockExclusiveNonblock)
    }

    /// Takes the lock, announcing the wait when another run holds it
    ///
    /// # Errors
    ///
    /// Returns `Error::Lock` if the file cannot be opened or locked.
    pub fn acquire_or_wait(path: &Path) -> Result<Self> {
        match Self::try_acquire(path) {
            Ok(lock) => Ok(lock),
            Err(_) => {
                info!("Waiting for another nfsinkhole run to release {}", path.display());
                Self::acquire(path)
            }
        }
    }

    fn lock(path: &Path, arg: FlockArg) -> Result<Self> {
        let lock_err = |message: String| Error::Lock {
            path: path.display().to_string(),
            message,
        };

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| lock_err(e.to_string()))?;

        let lock = Flock::lock(file, arg).map_err(|(_, errno)| lock_err(errno.desc().to_string()))?;
        debug!("Acquired host lock {}", path.display());

        Ok(Self {
            _lock: lock,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
