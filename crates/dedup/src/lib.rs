//! Content-addressed dedup cache.
//!
//! Fingerprints processed message content so a message is handled exactly
//! once across restarts. Keys are `{group}:{sha256(normalized content)}`,
//! persisted write-through to a single JSON file with atomic replace.

mod cache;
mod fingerprint;

pub use {
    cache::{CacheEntry, DedupCache, EvictionPolicy},
    fingerprint::fingerprint,
};
