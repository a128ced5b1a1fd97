//! JSON file-backed dedup cache with atomic writes.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    anyhow::{Context, Result},
    serde::{Deserialize, Serialize},
    tokio::{fs, sync::Mutex},
    tracing::{debug, warn},
};

use crate::fingerprint;

/// Bounds on cache growth. The default is unbounded: the backing file then
/// doubles as a permanent audit trail of processed fingerprints.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvictionPolicy {
    /// Keep at most this many entries, evicting the oldest first.
    pub max_entries: Option<usize>,
    /// Drop entries older than this during [`DedupCache::purge_expired`].
    pub max_age: Option<Duration>,
}

/// One cached fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Unix timestamp (seconds) when the entry was written.
    pub cached_at: u64,
}

/// Persistent seen-set keyed by `{group}:{fingerprint}`.
///
/// Every mutation is written through to disk before it returns, so a crash
/// between marking and replying errs toward dropping a reply rather than
/// sending a duplicate.
pub struct DedupCache {
    path: PathBuf,
    policy: EvictionPolicy,
    entries: Mutex<BTreeMap<String, CacheEntry>>,
}

impl DedupCache {
    /// Open the cache at `path`, loading any existing entries.
    ///
    /// A missing file starts empty. A corrupt file is logged and discarded
    /// rather than aborting startup; the next write replaces it.
    pub async fn open(path: PathBuf, policy: EvictionPolicy) -> Result<Self> {
        let entries = if fs::try_exists(&path).await.unwrap_or(false) {
            let data = fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            match serde_json::from_str::<BTreeMap<String, CacheEntry>>(&data) {
                Ok(map) => {
                    debug!(path = %path.display(), entries = map.len(), "loaded dedup cache");
                    map
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt cache file, starting empty");
                    BTreeMap::new()
                },
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            policy,
            entries: Mutex::new(entries),
        })
    }

    /// Has this content already been processed for this group?
    pub async fn is_cached(&self, group: &str, content: &str) -> bool {
        let key = cache_key(group, content);
        self.entries.lock().await.contains_key(&key)
    }

    /// Mark content as processed, writing through to disk.
    ///
    /// Returns `false` if the entry was already present (nothing written).
    pub async fn insert(&self, group: &str, content: &str) -> Result<bool> {
        let key = cache_key(group, content);
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&key) {
            return Ok(false);
        }

        entries.insert(key, CacheEntry { cached_at: now() });
        self.enforce_max_entries(&mut entries);
        self.persist(&entries).await?;
        Ok(true)
    }

    /// Drop entries older than the policy's `max_age`.
    ///
    /// No-op (returning 0) when no age bound is configured.
    pub async fn purge_expired(&self) -> Result<usize> {
        let Some(max_age) = self.policy.max_age else {
            return Ok(0);
        };
        let cutoff = now().saturating_sub(max_age.as_secs());

        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| e.cached_at >= cutoff);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "purged expired cache entries");
            self.persist(&entries).await?;
        }
        Ok(removed)
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Evict oldest entries beyond `max_entries`. Caller persists.
    fn enforce_max_entries(&self, entries: &mut BTreeMap<String, CacheEntry>) {
        let Some(max) = self.policy.max_entries else {
            return;
        };
        while entries.len() > max {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.cached_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                },
                None => break,
            }
        }
    }

    /// Atomic write: write to temp, rename over target, keep `.bak`.
    async fn persist(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");

        fs::write(&tmp, json.as_bytes()).await?;

        // Backup existing file.
        if fs::try_exists(&self.path).await.unwrap_or(false) {
            let bak = self.path.with_extension("json.bak");
            let _ = fs::rename(&self.path, &bak).await;
        }

        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn cache_key(group: &str, content: &str) -> String {
    format!("{group}:{}", fingerprint(content))
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn cache_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("cache.json")
    }

    #[tokio::test]
    async fn insert_then_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DedupCache::open(cache_path(&dir), EvictionPolicy::default())
            .await
            .unwrap();

        assert!(!cache.is_cached("Sales", "hello").await);
        assert!(cache.insert("Sales", "hello").await.unwrap());
        assert!(cache.is_cached("Sales", "hello").await);
    }

    #[tokio::test]
    async fn duplicate_insert_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DedupCache::open(cache_path(&dir), EvictionPolicy::default())
            .await
            .unwrap();

        assert!(cache.insert("Sales", "hello").await.unwrap());
        assert!(!cache.insert("Sales", "hello").await.unwrap());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn normalized_variants_hit_same_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DedupCache::open(cache_path(&dir), EvictionPolicy::default())
            .await
            .unwrap();

        cache.insert("Sales", "Hello World").await.unwrap();
        assert!(cache.is_cached("Sales", "  hello world  ").await);
        assert!(cache.is_cached("Sales", "HELLO WORLD").await);
    }

    #[tokio::test]
    async fn groups_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DedupCache::open(cache_path(&dir), EvictionPolicy::default())
            .await
            .unwrap();

        cache.insert("Sales", "hello").await.unwrap();
        assert!(!cache.is_cached("Support", "hello").await);
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path(&dir);

        {
            let cache = DedupCache::open(path.clone(), EvictionPolicy::default())
                .await
                .unwrap();
            cache.insert("Sales", "hello").await.unwrap();
        }

        let cache = DedupCache::open(path, EvictionPolicy::default())
            .await
            .unwrap();
        assert!(cache.is_cached("Sales", "hello").await);
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path(&dir);
        std::fs::write(&path, "not json {{{").unwrap();

        let cache = DedupCache::open(path, EvictionPolicy::default())
            .await
            .unwrap();
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn max_entries_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let policy = EvictionPolicy {
            max_entries: Some(2),
            max_age: None,
        };
        let cache = DedupCache::open(cache_path(&dir), policy).await.unwrap();

        cache.insert("g", "one").await.unwrap();
        cache.insert("g", "two").await.unwrap();
        cache.insert("g", "three").await.unwrap();

        assert_eq!(cache.len().await, 2);
        assert!(cache.is_cached("g", "three").await);
    }

    #[tokio::test]
    async fn purge_without_age_bound_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DedupCache::open(cache_path(&dir), EvictionPolicy::default())
            .await
            .unwrap();
        cache.insert("g", "one").await.unwrap();
        assert_eq!(cache.purge_expired().await.unwrap(), 0);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn purge_drops_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let policy = EvictionPolicy {
            max_entries: None,
            max_age: Some(Duration::from_secs(3600)),
        };
        let cache = DedupCache::open(cache_path(&dir), policy).await.unwrap();

        cache.insert("g", "old").await.unwrap();
        {
            let mut entries = cache.entries.lock().await;
            entries.get_mut(&cache_key("g", "old")).unwrap().cached_at = now() - 7200;
        }
        cache.insert("g", "fresh").await.unwrap();

        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert!(!cache.is_cached("g", "old").await);
        assert!(cache.is_cached("g", "fresh").await);
    }

    #[tokio::test]
    async fn concurrent_inserts_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let cache = std::sync::Arc::new(
            DedupCache::open(cache_path(&dir), EvictionPolicy::default())
                .await
                .unwrap(),
        );

        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = std::sync::Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.insert("g", &format!("message {i}")).await.unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(cache.len().await, 16);

        // The file on disk reflects every insert.
        let reopened = DedupCache::open(cache_path(&dir), EvictionPolicy::default())
            .await
            .unwrap();
        assert_eq!(reopened.len().await, 16);
    }

    #[tokio::test]
    async fn write_through_is_atomic_with_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path(&dir);
        let cache = DedupCache::open(path.clone(), EvictionPolicy::default())
            .await
            .unwrap();

        cache.insert("g", "one").await.unwrap();
        cache.insert("g", "two").await.unwrap();

        assert!(path.exists());
        assert!(path.with_extension("json.bak").exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
