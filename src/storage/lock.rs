//! Exclusive advisory lock serializing archive runs on one site checkout.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, info};

use crate::ledger::LedgerError;

const RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Held lock on the ledger resource. Released on drop.
#[derive(Debug)]
pub struct LedgerLock {
    path: PathBuf,
    file: File,
}

impl LedgerLock {
    /// Try to take the lock once without waiting.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|source| LedgerError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                path: path.to_path_buf(),
                file,
            })),
            Err(_) => Ok(None),
        }
    }

    /// Wait up to `timeout` for the lock, polling.
    pub async fn acquire(path: &Path, timeout: Duration) -> Result<Self, LedgerError> {
        let start = Instant::now();
        let mut announced = false;

        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                debug!(path = %path.display(), waited_ms = start.elapsed().as_millis() as u64, "ledger lock acquired");
                return Ok(lock);
            }
            if start.elapsed() >= timeout {
                return Err(LedgerError::LockTimeout {
                    path: path.to_path_buf(),
                    waited: start.elapsed(),
                });
            }
            if !announced {
                info!(path = %path.display(), "ledger lock held by another run, waiting");
                announced = true;
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "ledger lock released");
    }
}
