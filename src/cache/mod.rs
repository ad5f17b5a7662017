//! In-memory response cache.
//!
//! Stores fully-built response artifacts keyed on
//! `(path, encoding, versioned-flavor)` under a byte budget, with LRU or LFU
//! eviction selected at construction and TTL expiry enforced both on lookup
//! and by a background sweeper.

mod entry;
mod store;
mod sweeper;

pub use entry::{AssetEntry, AssetKey, CacheStats};
pub use store::{AssetCache, LfuAssetStore, LruAssetStore, new_store};
pub use sweeper::{SweeperHandle, spawn as spawn_sweeper};
