//! Build cache (§4.12).
//!
//! Keyed by [`CacheKey`] (§4.9), which already folds in the node's
//! operation digest, every dependency's cache key, and the target
//! platform — so a `get`/`put` pair here never needs to re-derive
//! collision resistance, it only needs to store and retrieve.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::digest::Digest;
use crate::error::Result;

use crate::buildgraph::ir::CacheKey;

/// A cached node result: the snapshot it produced, plus enough image
/// config deltas to replay without re-executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Snapshot digest produced by this node when it last ran.
    pub snapshot: Digest,
    /// Wall-clock duration the original execution took, in
    /// milliseconds, surfaced to the reporter on a cache hit so
    /// "saved time" can be reported.
    pub original_duration_ms: u64,
}

/// Single-writer cache store (§5: one lock, all mutation inside it).
pub struct BuildCache {
    entries: Arc<Mutex<HashMap<CacheKey, CacheEntry>>>,
}

impl BuildCache {
    /// Construct an empty in-memory cache.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Look up a cache entry by key.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.lock().await.get(key).cloned()
    }

    /// Store a cache entry, overwriting any existing one for the key.
    pub async fn put(&self, key: CacheKey, entry: CacheEntry) -> Result<()> {
        self.entries.lock().await.insert(key, entry);
        Ok(())
    }

    /// Number of entries currently cached.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the cache has no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for BuildCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildgraph::ir::{ImageOperation, ImageSource, Operation};

    fn key() -> CacheKey {
        CacheKey::compute(&Operation::Image(ImageOperation { source: ImageSource::Scratch }), &[], "linux/amd64")
    }

    #[tokio::test]
    async fn miss_then_put_then_hit() {
        let cache = BuildCache::new();
        assert!(cache.get(&key()).await.is_none());
        cache
            .put(key(), CacheEntry { snapshot: Digest::of(b"x"), original_duration_ms: 100 })
            .await
            .unwrap();
        assert!(cache.get(&key()).await.is_some());
    }

    #[tokio::test]
    async fn put_overwrites_existing_entry() {
        let cache = BuildCache::new();
        cache
            .put(key(), CacheEntry { snapshot: Digest::of(b"x"), original_duration_ms: 1 })
            .await
            .unwrap();
        cache
            .put(key(), CacheEntry { snapshot: Digest::of(b"y"), original_duration_ms: 2 })
            .await
            .unwrap();
        let entry = cache.get(&key()).await.unwrap();
        assert_eq!(entry.snapshot, Digest::of(b"y"));
        assert_eq!(cache.len().await, 1);
    }
}
