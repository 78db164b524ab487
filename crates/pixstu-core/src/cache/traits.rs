//! Cache backend trait and types.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entry count and byte total for one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceStats {
    pub namespace: String,
    pub entry_count: u64,
    pub total_bytes: u64,
}

impl NamespaceStats {
    pub fn empty(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }
}

/// Listing view of a stored entry (value not loaded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub key: String,
    pub size_bytes: u64,
    /// Last write or successful read.
    pub last_touched: DateTime<Utc>,
}

/// What an eviction pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Eviction {
    pub entries: usize,
    pub bytes: u64,
}

/// Storage seam for [`CacheDb`](super::CacheDb).
///
/// Every method is scoped to one namespace except `all_namespaces`, `vacuum`
/// and `reset`. Callers serialize access, so methods take `&mut self` and
/// may run several statements without further locking.
///
/// Timestamps are whole seconds since the epoch. Entries touched in the same
/// second keep the order in which they were touched.
pub trait CacheBackend: Send {
    /// Return the value and mark it recently used.
    ///
    /// An entry whose age (`now - timestamp`) exceeds `ttl_secs` is removed
    /// and reported as absent. `ttl_secs == 0` disables the age check.
    fn fetch(&mut self, namespace: &str, key: &str, now: i64, ttl_secs: i64)
        -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite an entry, stamping it with `now`.
    fn upsert(&mut self, namespace: &str, key: &str, value: &[u8], now: i64) -> Result<()>;

    /// Delete one entry. Returns whether it existed.
    fn remove(&mut self, namespace: &str, key: &str) -> Result<bool>;

    /// Delete every entry in the namespace.
    fn remove_namespace(&mut self, namespace: &str) -> Result<usize>;

    /// Delete entries last touched before `cutoff`.
    fn purge_older_than(&mut self, namespace: &str, cutoff: i64) -> Result<usize>;

    /// Evict least recently touched entries until the namespace total is at
    /// or below `target_bytes`. `protect` is never evicted.
    fn evict_to(
        &mut self,
        namespace: &str,
        target_bytes: u64,
        protect: Option<&str>,
    ) -> Result<Eviction>;

    fn namespace_stats(&mut self, namespace: &str) -> Result<NamespaceStats>;

    /// Entries of the namespace, most recently touched first.
    fn list_entries(&mut self, namespace: &str) -> Result<Vec<EntryMeta>>;

    /// Statistics for every namespace in the store, sorted by name.
    fn all_namespaces(&mut self) -> Result<Vec<NamespaceStats>>;

    /// Compact the backing storage.
    fn vacuum(&mut self) -> Result<()>;

    /// Discard all storage and recreate it empty.
    fn reset(&mut self) -> Result<()>;
}
