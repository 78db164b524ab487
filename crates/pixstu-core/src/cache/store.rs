//! Namespaced view over the shared cache database.

use super::clock::{Clock, SystemClock};
use super::db::CacheDb;
use super::sqlite::SqliteBackend;
use super::traits::{CacheBackend, EntryMeta, NamespaceStats};
use crate::codec;
use crate::config::CacheConfig;
use crate::error::Result;
use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, warn};

/// Generation-result cache for one namespace.
///
/// Entries carry a last-touched timestamp that both writes and successful
/// reads refresh. Writes purge entries older than the TTL and then evict the
/// least recently touched entries until the namespace fits its byte budget.
///
/// Corruption in the backing file is repaired in place: reads report a
/// miss, writes are retried once on the fresh store.
pub struct CacheStore<B: CacheBackend = SqliteBackend> {
    db: CacheDb<B>,
    namespace: String,
    max_bytes: u64,
    ttl_seconds: u64,
    enabled: bool,
    clock: Arc<dyn Clock>,
}

impl CacheStore<SqliteBackend> {
    /// Open (or create) the database at `config.db_path` and bind a namespace.
    pub fn open(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let db = CacheDb::open(&config.db_path)?;
        Self::with_db(db, &config)
    }
}

impl<B: CacheBackend> CacheStore<B> {
    /// Bind a namespace to an existing handle.
    ///
    /// `config.db_path` is not opened again; `db` is used as is. Pipelines
    /// that share one handle share one connection and lock.
    pub fn with_db(db: CacheDb<B>, config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            db,
            namespace: config.namespace.clone(),
            max_bytes: config.max_bytes,
            ttl_seconds: config.ttl_seconds,
            enabled: config.enabled,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Handle to the shared database, for store-wide maintenance.
    pub fn db(&self) -> &CacheDb<B> {
        &self.db
    }

    // Validated to fit in i64 at construction.
    fn ttl_secs_i64(&self) -> i64 {
        i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX)
    }

    /// Look up `key`, refreshing its recency on a hit.
    ///
    /// Expired entries are removed and reported as absent. Corruption resets
    /// the store and is reported as absent too.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if !self.enabled {
            return Ok(None);
        }

        let now = self.clock.now_secs();
        let ttl = self.ttl_secs_i64();
        self.db.read_or_heal("get", None, |b| {
            b.fetch(&self.namespace, key, now, ttl)
        })
    }

    /// Store `value` under `key`, then apply the TTL and the byte budget.
    ///
    /// The entry just written is never evicted by this call, even if it is
    /// larger than the budget on its own.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.max_bytes > 0 && value.len() as u64 > self.max_bytes {
            warn!(
                "Entry '{}' ({} bytes) exceeds the {} byte budget of namespace '{}'",
                key,
                value.len(),
                self.max_bytes,
                self.namespace
            );
        }

        let now = self.clock.now_secs();
        let ttl = self.ttl_secs_i64();

        self.db.write_with_heal("put", |b| {
            b.upsert(&self.namespace, key, value, now)?;

            if ttl > 0 {
                b.purge_older_than(&self.namespace, now.saturating_sub(ttl))?;
            }

            if self.max_bytes > 0 {
                let evicted = b.evict_to(&self.namespace, self.max_bytes, Some(key))?;
                if evicted.entries > 0 {
                    debug!(
                        "Evicted {} entries ({} bytes) from namespace '{}'",
                        evicted.entries, evicted.bytes, self.namespace
                    );
                }
            }

            Ok(())
        })
    }

    /// Remove `key`. Returns whether an entry was removed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.db
            .write_with_heal("delete", |b| b.remove(&self.namespace, key))
    }

    /// Remove every entry in this namespace. Other namespaces are untouched.
    pub fn clear(&self) -> Result<usize> {
        self.db
            .write_with_heal("clear", |b| b.remove_namespace(&self.namespace))
    }

    pub fn stats(&self) -> Result<NamespaceStats> {
        self.db.read_or_heal(
            "stats",
            NamespaceStats::empty(&self.namespace),
            |b| b.namespace_stats(&self.namespace),
        )
    }

    /// Entries in this namespace, most recently touched first.
    pub fn entries(&self) -> Result<Vec<EntryMeta>> {
        self.db
            .read_or_heal("entries", Vec::new(), |b| b.list_entries(&self.namespace))
    }

    /// Evict least recently touched entries down to `target_bytes`.
    ///
    /// Independent of the configured budget. Returns the bytes freed.
    pub fn prune(&self, target_bytes: u64) -> Result<u64> {
        let evicted = self.db.write_with_heal("prune", |b| {
            b.evict_to(&self.namespace, target_bytes, None)
        })?;

        debug!(
            "Pruned {} entries ({} bytes) from namespace '{}'",
            evicted.entries, evicted.bytes, self.namespace
        );
        Ok(evicted.bytes)
    }

    /// Remove entries older than the TTL. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let ttl = self.ttl_secs_i64();
        if ttl == 0 {
            return Ok(0);
        }

        let cutoff = self.clock.now_secs().saturating_sub(ttl);
        self.db.write_with_heal("purge", |b| {
            b.purge_older_than(&self.namespace, cutoff)
        })
    }

    /// Look up and decode an image.
    ///
    /// A payload that does not decode is deleted and reported as absent.
    pub fn get_image(&self, key: &str) -> Result<Option<DynamicImage>> {
        let bytes = match self.get(key)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        match codec::decode_image(&bytes) {
            Ok(image) => Ok(Some(image)),
            Err(e) => {
                warn!(
                    "Dropping undecodable cache entry '{}' in namespace '{}': {}",
                    key, self.namespace, e
                );
                if let Err(delete_err) = self.delete(key) {
                    warn!("Failed to delete bad cache entry '{}': {}", key, delete_err);
                }
                Ok(None)
            }
        }
    }

    /// Encode `image` as PNG and store it.
    pub fn put_image(&self, key: &str, image: &DynamicImage) -> Result<()> {
        let bytes = codec::encode_png(image)?;
        self.put(key, &bytes)
    }

    /// Return the cached image for `key`, or run `generate` and cache its result.
    pub fn get_or_insert_image_with<F>(&self, key: &str, generate: F) -> Result<DynamicImage>
    where
        F: FnOnce() -> Result<DynamicImage>,
    {
        if let Some(image) = self.get_image(key)? {
            debug!("Cache hit for '{}' in namespace '{}'", key, self.namespace);
            return Ok(image);
        }

        let image = generate()?;
        self.put_image(key, &image)?;
        Ok(image)
    }
}
