//! Persistent generation-result cache.
//!
//! All pipelines share a single SQLite file; each `CacheStore` is bound to
//! one namespace inside it, with its own byte budget and TTL.

mod clock;
mod db;
mod sqlite;
mod store;
mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use db::CacheDb;
pub use sqlite::SqliteBackend;
pub use store::CacheStore;
pub use traits::{CacheBackend, EntryMeta, Eviction, NamespaceStats};
