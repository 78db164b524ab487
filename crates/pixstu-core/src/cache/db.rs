//! Shared handle to the backing store and the corruption recovery policy.
//!
//! Reads that hit corruption reset the store and report a miss. Writes that
//! hit corruption reset the store and run once more; a second failure is
//! returned to the caller.

use super::sqlite::SqliteBackend;
use super::traits::{CacheBackend, NamespaceStats};
use crate::error::{PixstuError, Result};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, warn};

/// Clonable, thread-safe handle to one backing store.
///
/// Every compound operation runs under a single acquisition of the inner
/// mutex, so callers never see a half-applied put/purge/evict sequence.
pub struct CacheDb<B: CacheBackend = SqliteBackend> {
    backend: Arc<Mutex<B>>,
}

impl<B: CacheBackend> Clone for CacheDb<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl CacheDb<SqliteBackend> {
    /// Open the SQLite store at `db_path`, recreating it if it is corrupt.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        let backend = match SqliteBackend::open(db_path) {
            Ok(backend) => backend,
            Err(e) if e.is_corruption() => {
                warn!(
                    "Cache database {} is unusable ({}), recreating",
                    db_path.display(),
                    e
                );
                SqliteBackend::recreate(db_path)?
            }
            Err(e) => return Err(e),
        };

        Ok(Self::from_backend(backend))
    }
}

impl<B: CacheBackend> CacheDb<B> {
    pub fn from_backend(backend: B) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, B>> {
        self.backend.lock().map_err(|e| PixstuError::Database {
            message: format!("Failed to lock cache database: {}", e),
            source: None,
        })
    }

    /// Run a read; on corruption, reset the store and return `on_reset`.
    pub(crate) fn read_or_heal<T>(
        &self,
        operation: &str,
        on_reset: T,
        op: impl FnOnce(&mut B) -> Result<T>,
    ) -> Result<T> {
        let mut backend = self.lock()?;

        match op(&mut backend) {
            Err(e) if e.is_corruption() => {
                warn!("Cache corruption during {}: {}; resetting store", operation, e);
                if let Err(reset_err) = backend.reset() {
                    error!("Failed to reset cache store after {}: {}", operation, reset_err);
                }
                Ok(on_reset)
            }
            result => result,
        }
    }

    /// Run a write; on corruption, reset the store and retry exactly once.
    pub(crate) fn write_with_heal<T>(
        &self,
        operation: &str,
        mut op: impl FnMut(&mut B) -> Result<T>,
    ) -> Result<T> {
        let mut backend = self.lock()?;

        match op(&mut backend) {
            Err(e) if e.is_corruption() => {
                warn!("Cache corruption during {}: {}; resetting store", operation, e);
                backend.reset()?;
                op(&mut backend)
            }
            result => result,
        }
    }

    /// Statistics for every namespace sharing this store.
    pub fn namespaces(&self) -> Result<Vec<NamespaceStats>> {
        self.read_or_heal("namespaces", Vec::new(), |b| b.all_namespaces())
    }

    /// Compact the backing file.
    ///
    /// Not run automatically after evictions; schedule it from maintenance.
    pub fn vacuum(&self) -> Result<()> {
        self.write_with_heal("vacuum", |b| b.vacuum())
    }

    /// Discard every entry in every namespace.
    pub fn reset(&self) -> Result<()> {
        self.lock()?.reset()
    }
}
