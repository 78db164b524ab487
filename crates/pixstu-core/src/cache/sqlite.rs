//! SQLite storage for the generation cache.

use super::traits::{CacheBackend, EntryMeta, Eviction, NamespaceStats};
use crate::error::{PixstuError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Allocates the next touch sequence number inside a statement.
const NEXT_SEQ: &str = "(SELECT COALESCE(MAX(seq), 0) + 1 FROM kv)";

/// Identity of the file a connection was opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn file_identity(path: &Path) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;

    let meta = std::fs::metadata(path).ok()?;
    Some(FileIdentity {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

#[cfg(not(unix))]
fn file_identity(path: &Path) -> Option<FileIdentity> {
    let created = std::fs::metadata(path).ok()?.created().ok()?;
    let since_epoch = created.duration_since(std::time::UNIX_EPOCH).ok()?;
    Some(FileIdentity {
        dev: since_epoch.as_secs(),
        ino: u64::from(since_epoch.subsec_nanos()),
    })
}

/// SQLite-backed cache storage.
///
/// All namespaces share one file. The connection is opened lazily: `None`
/// means the store is not ready (for example after a failed reset) and the
/// next operation reconnects. If the file at `db_path` is replaced or
/// removed behind an open connection (another handle recreated it), the
/// next operation reconnects to whatever is there now.
pub struct SqliteBackend {
    db_path: PathBuf,
    conn: Option<Connection>,
    identity: Option<FileIdentity>,
}

impl SqliteBackend {
    /// Open the database at `db_path`, creating file and schema if needed.
    ///
    /// Fails with a corruption-class error if the file exists but is not a
    /// usable cache database.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let mut backend = Self {
            db_path: db_path.into(),
            conn: None,
            identity: None,
        };
        backend.connection()?;
        Ok(backend)
    }

    /// Discard whatever is at `db_path` and start from an empty database.
    pub fn recreate(db_path: impl Into<PathBuf>) -> Result<Self> {
        let mut backend = Self {
            db_path: db_path.into(),
            conn: None,
            identity: None,
        };
        backend.reset()?;
        Ok(backend)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Get the live connection, connecting first if needed.
    fn connection(&mut self) -> Result<&mut Connection> {
        if self.conn.is_some() && file_identity(&self.db_path) != self.identity {
            debug!(
                "Cache database {} was replaced, reconnecting",
                self.db_path.display()
            );
            self.conn = None;
        }

        if self.conn.is_none() {
            self.reconnect()?;
        }
        self.conn.as_mut().ok_or_else(|| PixstuError::Database {
            message: "Cache database connection unavailable".to_string(),
            source: None,
        })
    }

    fn reconnect(&mut self) -> Result<()> {
        self.conn = None;
        let conn = Self::connect(&self.db_path)?;
        self.identity = file_identity(&self.db_path);
        self.conn = Some(conn);
        Ok(())
    }

    /// Drop and recreate the schema inside the existing file.
    ///
    /// Other connections to the file stay valid and see the empty table.
    fn clear_in_place(conn: &mut Connection) -> Result<()> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch("DROP TABLE IF EXISTS kv;")?;
        Self::ensure_schema(&tx)?;
        tx.commit()?;
        Ok(())
    }

    fn connect(db_path: &Path) -> Result<Connection> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| PixstuError::Io {
                    message: format!("Failed to create cache directory: {}", e),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::configure_connection(&conn)?;
        Self::ensure_schema(&conn)?;

        debug!("Opened cache database at {}", db_path.display());
        Ok(conn)
    }

    /// Configure connection pragmas.
    ///
    /// The journal-mode pragma is the first statement that reads the file
    /// header, so a garbage file fails here with `NotADatabase`. The busy
    /// timeout must be set before it.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            PRAGMA busy_timeout=5000;
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            ",
        )?;
        Ok(())
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                ns TEXT NOT NULL,
                k TEXT NOT NULL,
                v BLOB NOT NULL,
                ts INTEGER NOT NULL,
                sz INTEGER NOT NULL,
                seq INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (ns, k)
            );

            -- Oldest-first eviction and TTL scans
            CREATE INDEX IF NOT EXISTS idx_kv_ns_ts ON kv(ns, ts, seq);

            -- Next touch sequence number
            CREATE INDEX IF NOT EXISTS idx_kv_seq ON kv(seq);
            "#,
        )?;
        Ok(())
    }

    fn remove_files(&self) -> Result<()> {
        let mut paths = vec![self.db_path.clone()];
        for suffix in ["-wal", "-shm", "-journal"] {
            let mut name = self.db_path.clone().into_os_string();
            name.push(suffix);
            paths.push(PathBuf::from(name));
        }

        for path in paths {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(PixstuError::io_with_path(e, path)),
            }
        }
        Ok(())
    }
}

fn to_bytes(size: i64) -> u64 {
    u64::try_from(size).unwrap_or(0)
}

fn to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

impl CacheBackend for SqliteBackend {
    fn fetch(
        &mut self,
        namespace: &str,
        key: &str,
        now: i64,
        ttl_secs: i64,
    ) -> Result<Option<Vec<u8>>> {
        let conn = self.connection()?;

        let row: Option<(Vec<u8>, i64)> = conn
            .query_row(
                "SELECT v, ts FROM kv WHERE ns = ?1 AND k = ?2",
                params![namespace, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (value, ts) = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        if ttl_secs > 0 && now.saturating_sub(ts) > ttl_secs {
            conn.execute(
                "DELETE FROM kv WHERE ns = ?1 AND k = ?2",
                params![namespace, key],
            )?;
            debug!("Expired cache entry '{}' in namespace '{}'", key, namespace);
            return Ok(None);
        }

        conn.execute(
            &format!("UPDATE kv SET ts = ?1, seq = {NEXT_SEQ} WHERE ns = ?2 AND k = ?3"),
            params![now, namespace, key],
        )?;

        Ok(Some(value))
    }

    fn upsert(&mut self, namespace: &str, key: &str, value: &[u8], now: i64) -> Result<()> {
        let conn = self.connection()?;
        let size_bytes = value.len() as i64;

        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO kv (ns, k, v, ts, sz, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, {NEXT_SEQ})"
            ),
            params![namespace, key, value, now, size_bytes],
        )?;
        Ok(())
    }

    fn remove(&mut self, namespace: &str, key: &str) -> Result<bool> {
        let conn = self.connection()?;
        let deleted = conn.execute(
            "DELETE FROM kv WHERE ns = ?1 AND k = ?2",
            params![namespace, key],
        )?;
        Ok(deleted > 0)
    }

    fn remove_namespace(&mut self, namespace: &str) -> Result<usize> {
        let conn = self.connection()?;
        let deleted = conn.execute("DELETE FROM kv WHERE ns = ?1", params![namespace])?;
        debug!(
            "Cleared {} entries from namespace '{}'",
            deleted, namespace
        );
        Ok(deleted)
    }

    fn purge_older_than(&mut self, namespace: &str, cutoff: i64) -> Result<usize> {
        let conn = self.connection()?;
        let deleted = conn.execute(
            "DELETE FROM kv WHERE ns = ?1 AND ts < ?2",
            params![namespace, cutoff],
        )?;
        if deleted > 0 {
            debug!(
                "Purged {} expired entries from namespace '{}'",
                deleted, namespace
            );
        }
        Ok(deleted)
    }

    fn evict_to(
        &mut self,
        namespace: &str,
        target_bytes: u64,
        protect: Option<&str>,
    ) -> Result<Eviction> {
        let conn = self.connection()?;
        // Write lock up front: the sum and the deletes must see one snapshot.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: i64 = tx.query_row(
            "SELECT COALESCE(SUM(sz), 0) FROM kv WHERE ns = ?1",
            params![namespace],
            |row| row.get(0),
        )?;
        let mut total = to_bytes(current);

        if total <= target_bytes {
            return Ok(Eviction::default());
        }

        debug!(
            "Namespace '{}' holds {} bytes, evicting down to {}",
            namespace, total, target_bytes
        );

        let candidates: Vec<(String, i64)> = {
            let mut stmt =
                tx.prepare("SELECT k, sz FROM kv WHERE ns = ?1 ORDER BY ts ASC, seq ASC")?;
            let rows = stmt.query_map(params![namespace], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut evicted = Eviction::default();
        for (key, size) in candidates {
            if total <= target_bytes {
                break;
            }
            if protect == Some(key.as_str()) {
                continue;
            }

            tx.execute(
                "DELETE FROM kv WHERE ns = ?1 AND k = ?2",
                params![namespace, key],
            )?;

            let size = to_bytes(size);
            total = total.saturating_sub(size);
            evicted.entries += 1;
            evicted.bytes += size;
        }

        tx.commit()?;

        if total > target_bytes {
            warn!(
                "Namespace '{}' still holds {} bytes after eviction (target {})",
                namespace, total, target_bytes
            );
        }

        Ok(evicted)
    }

    fn namespace_stats(&mut self, namespace: &str) -> Result<NamespaceStats> {
        let conn = self.connection()?;
        let (count, size): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(sz), 0) FROM kv WHERE ns = ?1",
            params![namespace],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(NamespaceStats {
            namespace: namespace.to_string(),
            entry_count: to_bytes(count),
            total_bytes: to_bytes(size),
        })
    }

    fn list_entries(&mut self, namespace: &str) -> Result<Vec<EntryMeta>> {
        let conn = self.connection()?;
        let mut stmt =
            conn.prepare("SELECT k, sz, ts FROM kv WHERE ns = ?1 ORDER BY ts DESC, seq DESC")?;

        let entries = stmt
            .query_map(params![namespace], |row| {
                let key: String = row.get(0)?;
                let size: i64 = row.get(1)?;
                let ts: i64 = row.get(2)?;
                Ok(EntryMeta {
                    key,
                    size_bytes: to_bytes(size),
                    last_touched: to_datetime(ts),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    fn all_namespaces(&mut self) -> Result<Vec<NamespaceStats>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT ns, COUNT(*), COALESCE(SUM(sz), 0) FROM kv GROUP BY ns ORDER BY ns",
        )?;

        let namespaces = stmt
            .query_map([], |row| {
                let namespace: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                let size: i64 = row.get(2)?;
                Ok(NamespaceStats {
                    namespace,
                    entry_count: to_bytes(count),
                    total_bytes: to_bytes(size),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(namespaces)
    }

    fn vacuum(&mut self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch("VACUUM;")?;
        debug!("Vacuumed cache database");
        Ok(())
    }

    /// Empty the store.
    ///
    /// A file that still opens is cleared in place so other handles on it
    /// keep working. Only a file SQLite cannot read is deleted and created
    /// anew; other handles notice the new file and reconnect.
    fn reset(&mut self) -> Result<()> {
        let cleared = self.connection().and_then(Self::clear_in_place);
        match cleared {
            Ok(()) => {
                warn!("Cleared cache database at {}", self.db_path.display());
                return Ok(());
            }
            Err(e) if e.is_corruption() => {
                debug!("Cache database cannot be cleared in place: {}", e);
            }
            Err(e) => return Err(e),
        }

        // Close before unlinking so this handle never writes to the old inode.
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                warn!("Failed to close cache database cleanly: {}", e);
            }
        }

        self.remove_files()?;
        self.reconnect()?;

        warn!("Recreated cache database at {}", self.db_path.display());
        Ok(())
    }
}
