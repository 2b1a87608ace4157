//! Exclusive use of the single sensor connection.
//!
//! The H5075 accepts one BLE session at a time. Every caller that touches the
//! transport (the update scheduler, a manual refresh) first takes the
//! [`ConnectionLease`]; the returned [`LeaseGuard`] releases it on drop.
//!
//! Within a process the lease is an async mutex. With
//! [`with_lock_file`](ConnectionLease::with_lock_file) it additionally holds
//! an exclusive OS lock on a file, so separate processes sharing that path
//! (a running service and a one-shot refresh) exclude each other too.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How often a contended lock file is retried.
pub const LOCK_FILE_POLL: Duration = Duration::from_millis(250);

/// Single-slot lease over the sensor connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionLease {
    slot: Arc<Mutex<()>>,
    holder: Arc<StdMutex<Option<String>>>,
    lock_file: Option<Arc<PathBuf>>,
}

/// Proof of holding the lease. Dropping it releases the lease.
#[derive(Debug)]
pub struct LeaseGuard {
    _slot: OwnedMutexGuard<()>,
    // closing the file releases the OS lock
    _file: Option<File>,
    name: String,
    holder: Arc<StdMutex<Option<String>>>,
}

impl LeaseGuard {
    pub fn holder(&self) -> &str {
        &self.name
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!("Lease released by {}", self.name);
    }
}

impl ConnectionLease {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also hold an exclusive lock on `path` while the lease is taken.
    #[must_use]
    pub fn with_lock_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_file = Some(Arc::new(path.into()));
        self
    }

    pub fn lock_file(&self) -> Option<&Path> {
        self.lock_file.as_deref().map(PathBuf::as_path)
    }

    fn grant(&self, slot: OwnedMutexGuard<()>, file: Option<File>, name: &str) -> LeaseGuard {
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner) = Some(name.to_string());
        debug!("Lease taken by {}", name);
        LeaseGuard {
            _slot: slot,
            _file: file,
            name: name.to_string(),
            holder: Arc::clone(&self.holder),
        }
    }

    /// Wait until the lease is free and take it.
    ///
    /// Fails only when the lock file cannot be opened or locked.
    pub async fn acquire(&self, holder: &str) -> Result<LeaseGuard> {
        let slot = Arc::clone(&self.slot).lock_owned().await;
        let file = match self.lock_file.as_deref() {
            Some(path) => Some(lock_exclusive(path, holder).await?),
            None => None,
        };
        Ok(self.grant(slot, file, holder))
    }

    /// Take the lease, giving up after `wait` with [`Error::LeaseBusy`].
    pub async fn acquire_timeout(&self, holder: &str, wait: Duration) -> Result<LeaseGuard> {
        match timeout(wait, self.acquire(holder)).await {
            Ok(result) => result,
            Err(_) => Err(Error::LeaseBusy {
                holder: self.current_holder().unwrap_or_else(|| "unknown".to_string()),
                waited: wait,
            }),
        }
    }

    /// Take the lease only if it is free right now.
    pub fn try_acquire(&self, holder: &str) -> Option<LeaseGuard> {
        let slot = Arc::clone(&self.slot).try_lock_owned().ok()?;
        let file = match self.lock_file.as_deref() {
            Some(path) => match try_lock_once(path, holder) {
                Ok(Some(file)) => Some(file),
                Ok(None) => return None,
                Err(e) => {
                    warn!("{}", e);
                    return None;
                }
            },
            None => None,
        };
        Some(self.grant(slot, file, holder))
    }

    /// Who holds the lease in this process, if anyone.
    pub fn holder(&self) -> Option<String> {
        self.holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The holder in this process, otherwise the one recorded in the lock file.
    fn current_holder(&self) -> Option<String> {
        self.holder().or_else(|| {
            let path = self.lock_file.as_deref()?;
            let mut text = String::new();
            File::open(path.as_path())
                .and_then(|mut f| f.read_to_string(&mut text))
                .ok()?;
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        })
    }

    /// Whether the lease is held in this process.
    pub fn is_held(&self) -> bool {
        self.slot.try_lock().is_err()
    }
}

fn lock_file_error(path: &Path, source: std::io::Error) -> Error {
    Error::LeaseFile {
        path: path.to_path_buf(),
        source,
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|e| lock_file_error(path, e))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| lock_file_error(path, e))
}

/// Record who holds the lock so a waiting process can name it.
fn write_holder(file: &mut File, holder: &str) -> std::io::Result<()> {
    file.set_len(0)?;
    file.rewind()?;
    write!(file, "{} (pid {})", holder, std::process::id())
}

fn try_lock_once(path: &Path, holder: &str) -> Result<Option<File>> {
    let mut file = open_lock_file(path)?;
    match file.try_lock() {
        Ok(()) => {
            if let Err(e) = write_holder(&mut file, holder) {
                debug!("Could not record lease holder: {}", e);
            }
            Ok(Some(file))
        }
        Err(TryLockError::WouldBlock) => Ok(None),
        Err(TryLockError::Error(e)) => Err(lock_file_error(path, e)),
    }
}

async fn lock_exclusive(path: &Path, holder: &str) -> Result<File> {
    loop {
        if let Some(file) = try_lock_once(path, holder)? {
            return Ok(file);
        }
        sleep(LOCK_FILE_POLL).await;
    }
}
