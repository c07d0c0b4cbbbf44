//! Hybrid two-tier state persistence.
//!
//! Every checkpoint, session state, and conversation tree is written to a
//! fast cache (TTL-bounded, best-effort) and a durable store (authoritative).
//! Reads go cache-first and repopulate the cache from the durable tier on a
//! miss.  A write that lands in either tier succeeds; only a double failure
//! surfaces to the caller.

pub mod codec;
mod file_store;
mod memory_cache;
mod sync;
mod tiers;
mod types;

pub use file_store::FileStore;
pub use memory_cache::MemoryCache;
pub use sync::{SessionSnapshot, StateSynchronizer};
pub use tiers::{CacheEntry, CheckpointRow, DurableStore, FastCache};
pub use types::{CheckpointData, CheckpointMetadata, CheckpointTrigger};
