//! Ledger persistence handles.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::Ledger;
use crate::storage;

/// Where a ledger lives. Passed into the pipeline explicitly so tests can
/// swap in an in-memory ledger.
pub trait LedgerStore: Send + Sync {
    /// Read the current ledger; an absent ledger is empty.
    fn load(&self) -> Result<Ledger>;

    /// Replace the persisted ledger wholesale.
    fn store(&self, ledger: &Ledger) -> Result<()>;
}

/// Ledger backed by a text file, replaced atomically on every store.
#[derive(Debug, Clone)]
pub struct FileLedgerStore {
    path: PathBuf,
    capacity: usize,
}

impl FileLedgerStore {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity,
        }
    }
}

impl LedgerStore for FileLedgerStore {
    fn load(&self) -> Result<Ledger> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => {
                let ledger = Ledger::parse(&text, self.capacity);
                debug!(path = %self.path.display(), entries = ledger.len(), "ledger loaded");
                Ok(ledger)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no ledger yet, starting empty");
                Ok(Ledger::new(self.capacity))
            }
            Err(e) => Err(e)
                .with_context(|| format!("failed to read ledger: {}", self.path.display())),
        }
    }

    fn store(&self, ledger: &Ledger) -> Result<()> {
        let text = ledger.to_text()?;
        storage::write_atomic(&self.path, text.as_bytes())
            .with_context(|| format!("failed to write ledger: {}", self.path.display()))?;
        info!(path = %self.path.display(), entries = ledger.len(), "ledger written");
        Ok(())
    }
}

/// In-memory ledger for tests and dry runs.
#[derive(Debug)]
pub struct MemoryLedgerStore {
    inner: Mutex<Ledger>,
}

impl MemoryLedgerStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Ledger::new(capacity)),
        }
    }

    /// Current contents.
    pub fn snapshot(&self) -> Ledger {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&self) -> Result<Ledger> {
        Ok(self.snapshot())
    }

    fn store(&self, ledger: &Ledger) -> Result<()> {
        // Serialize anyway so invalid entries fail the same way as on disk.
        ledger.to_text()?;
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = ledger.clone();
        Ok(())
    }
}
