//! Offline-first caching and synchronization layer.
//!
//! This module is independent of the FinTrack API. It provides:
//! - A record cache validated against a cheap server version probe
//! - A binary asset cache versioned by the resource's own marker
//! - A pending-write queue flushed at explicit sync points, one push at a time
//! - Key-value persistence (SQLite or in-memory)
//!
//! Network failures never escape this layer: reads fall back to cached data
//! and writes stay queued.

mod binary;
mod record;
mod storage;
mod sync;
#[cfg(test)]
pub(crate) mod testing;
mod traits;

pub use binary::{BinaryCache, BinaryRefresher, BinaryResource};
pub use record::RecordCache;
pub use storage::{read_json, write_json, KeySpace, KeyValueStore, MemoryStore, SqliteStore};
pub use sync::{BackgroundSync, SyncOutcome};
pub use traits::{
  BinarySource, CacheResult, CacheSource, Cacheable, Fetched, MutableSource, RecordSource,
  RecordVersion, ResourceVersion,
};
