//! Response cache for foresight-runtime.
//!
//! Maps `(model_id, prompt)` to the last successful [`CallResult`] so repeated
//! runs of the same question do not pay for the same completion twice.
//!
//! Entries carry their own `expires_at`. A lookup past that instant is a miss
//! even if moka has not evicted the entry yet, and the instant survives a
//! snapshot round-trip so expiry is stable across processes.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use foresight_core::CallResult;

const SNAPSHOT_VERSION: u32 = 1;

/// Errors from cache persistence.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache snapshot I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported cache snapshot version {0}")]
    Version(u32),
}

/// Deterministic key for a `(model_id, prompt)` pair.
///
/// The model id is length-prefixed so `("ab", "c")` and `("a", "bc")` differ.
/// No normalization is applied: any edit to the prompt changes the key.
pub fn cache_key(model_id: &str, prompt: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(model_id.len() as u64).to_le_bytes());
    hasher.update(model_id.as_bytes());
    hasher.update(prompt.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// One cached result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub model_id: String,
    pub result: CallResult,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Cache occupancy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries that would be served.
    pub active_entries: usize,

    /// Entries past `expires_at` that have not been evicted yet.
    pub expired_entries: usize,

    /// Active entries per model.
    pub by_model: BTreeMap<String, usize>,
}

impl CacheStats {
    pub fn total_entries(&self) -> usize {
        self.active_entries + self.expired_entries
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<CacheEntry>,
}

/// Response cache using moka.
///
/// Safe to share across tasks: moka handles concurrent reads and writes, and
/// each key is written independently.
pub struct ResponseCache {
    cache: Cache<String, CacheEntry>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached result for this pair, unless absent or expired.
    pub async fn get(&self, model_id: &str, prompt: &str) -> Option<CallResult> {
        let key = cache_key(model_id, prompt);
        let entry = self.cache.get(&key).await?;
        if entry.is_expired_at(Utc::now()) {
            debug!(model = %model_id, "Cache entry expired");
            self.cache.invalidate(&key).await;
            return None;
        }
        Some(entry.result)
    }

    /// Store a result. Only successful results are kept; anything else is
    /// ignored. Writing an existing key overwrites it.
    pub async fn set(&self, model_id: &str, prompt: &str, result: CallResult) {
        if !result.is_success() {
            debug!(model = %model_id, status = %result.status, "Not caching unsuccessful result");
            return;
        }
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let entry = CacheEntry {
            key: cache_key(model_id, prompt),
            model_id: model_id.to_string(),
            result,
            cached_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.insert_entry(entry).await;
    }

    pub(crate) async fn insert_entry(&self, entry: CacheEntry) {
        self.cache.insert(entry.key.clone(), entry).await;
    }

    /// Remove one pair.
    pub async fn invalidate(&self, model_id: &str, prompt: &str) {
        self.cache.invalidate(&cache_key(model_id, prompt)).await;
    }

    /// Remove everything.
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.run_pending_tasks().await;
        let now = Utc::now();
        let mut stats = CacheStats::default();
        for (_, entry) in self.cache.iter() {
            if entry.is_expired_at(now) {
                stats.expired_entries += 1;
            } else {
                stats.active_entries += 1;
                *stats.by_model.entry(entry.model_id.clone()).or_insert(0) += 1;
            }
        }
        stats
    }

    /// Write active entries to `path` as JSON.
    pub async fn save_snapshot(&self, path: &Path) -> Result<usize, CacheError> {
        self.cache.run_pending_tasks().await;
        let now = Utc::now();
        let mut entries: Vec<CacheEntry> = self
            .cache
            .iter()
            .map(|(_, entry)| entry)
            .filter(|entry| !entry.is_expired_at(now))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        let count = entries.len();

        let json = serde_json::to_vec_pretty(&Snapshot {
            version: SNAPSHOT_VERSION,
            entries,
        })?;

        let io_err = |source: std::io::Error| CacheError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(path, json).await.map_err(io_err)?;

        info!(path = %path.display(), entries = count, "Saved cache snapshot");
        Ok(count)
    }

    /// Load entries from a snapshot written by [`save_snapshot`](Self::save_snapshot).
    ///
    /// A missing file loads nothing. Expired entries are skipped.
    pub async fn load_snapshot(&self, path: &Path) -> Result<usize, CacheError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(CacheError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CacheError::Version(snapshot.version));
        }

        let now = Utc::now();
        let mut loaded = 0;
        for entry in snapshot.entries {
            if entry.is_expired_at(now) || !entry.result.is_success() {
                continue;
            }
            self.insert_entry(entry).await;
            loaded += 1;
        }

        info!(path = %path.display(), entries = loaded, "Loaded cache snapshot");
        Ok(loaded)
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(24 * 60 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foresight_core::TokenUsage;

    fn answer(model: &str, p: f64) -> CallResult {
        CallResult::success(
            model,
            format!("HAUPTPROGNOSE: {p}%"),
            Some(p),
            TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        )
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("foresight-cache-{}-{}.json", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_round_trip() {
        let cache = ResponseCache::default();
        assert!(cache.get("m", "prompt").await.is_none());

        let result = answer("m", 42.0);
        cache.set("m", "prompt", result.clone()).await;
        assert_eq!(cache.get("m", "prompt").await, Some(result));
    }

    #[tokio::test]
    async fn test_prompt_sensitive() {
        let cache = ResponseCache::default();
        cache.set("m", "prompt one", answer("m", 10.0)).await;

        assert!(cache.get("m", "prompt one ").await.is_none());
        assert!(cache.get("m", "Prompt one").await.is_none());
        assert!(cache.get("other", "prompt one").await.is_none());
        assert_ne!(cache_key("ab", "c"), cache_key("a", "bc"));
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let cache = ResponseCache::default();
        cache.set("m", "p", answer("m", 10.0)).await;
        cache.set("m", "p", answer("m", 20.0)).await;
        assert_eq!(cache.get("m", "p").await.and_then(|r| r.probability), Some(20.0));
    }

    #[tokio::test]
    async fn test_rejects_unsuccessful_results() {
        let cache = ResponseCache::default();
        cache.set("m", "p", CallResult::error("m", "boom")).await;
        cache.set("m", "p", CallResult::timeout("m", 120.0)).await;
        cache
            .set("m", "p", CallResult::rejected("m", "I cannot comply", TokenUsage::default()))
            .await;
        assert!(cache.get("m", "p").await.is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = ResponseCache::new(100, Duration::from_millis(50));
        cache.set("m", "p", answer("m", 42.0)).await;
        assert!(cache.get("m", "p").await.is_some());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get("m", "p").await.is_none());
    }

    #[tokio::test]
    async fn test_logical_expiry_before_eviction() {
        let cache = ResponseCache::default();
        let now = Utc::now();
        cache
            .insert_entry(CacheEntry {
                key: cache_key("m", "p"),
                model_id: "m".to_string(),
                result: answer("m", 42.0),
                cached_at: now - chrono::Duration::hours(48),
                expires_at: now - chrono::Duration::hours(24),
            })
            .await;
        cache.set("m", "fresh", answer("m", 10.0)).await;

        let stats = cache.stats().await;
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.active_entries, 1);
        assert_eq!(stats.by_model.get("m"), Some(&1));

        assert!(cache.get("m", "p").await.is_none());
        assert_eq!(cache.stats().await.total_entries(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = ResponseCache::default();
        cache.set("a", "p", answer("a", 1.0)).await;
        cache.set("b", "p", answer("b", 2.0)).await;

        cache.invalidate("a", "p").await;
        assert!(cache.get("a", "p").await.is_none());
        assert!(cache.get("b", "p").await.is_some());

        cache.clear().await;
        assert_eq!(cache.stats().await.total_entries(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let path = temp_path("round-trip");
        let cache = ResponseCache::default();
        cache.set("a", "p", answer("a", 30.0)).await;
        cache.set("b", "p", answer("b", 70.0)).await;
        assert_eq!(cache.save_snapshot(&path).await.unwrap(), 2);

        let restored = ResponseCache::default();
        assert_eq!(restored.load_snapshot(&path).await.unwrap(), 2);
        assert_eq!(
            restored.get("b", "p").await.and_then(|r| r.probability),
            Some(70.0)
        );

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_snapshot_skips_expired_entries() {
        let path = temp_path("expired");
        let now = Utc::now();
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            entries: vec![CacheEntry {
                key: cache_key("m", "p"),
                model_id: "m".to_string(),
                result: answer("m", 42.0),
                cached_at: now - chrono::Duration::hours(30),
                expires_at: now - chrono::Duration::hours(6),
            }],
        };
        std::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

        let cache = ResponseCache::default();
        assert_eq!(cache.load_snapshot(&path).await.unwrap(), 0);
        assert!(cache.get("m", "p").await.is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_missing_snapshot_loads_nothing() {
        let cache = ResponseCache::default();
        let loaded = cache
            .load_snapshot(Path::new("/nonexistent/foresight/cache.json"))
            .await
            .unwrap();
        assert_eq!(loaded, 0);
    }

    mod props {
        use super::super::cache_key;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn distinct_pairs_never_share_a_key(
                model in "[a-z/.-]{1,20}",
                p1 in ".{0,60}",
                p2 in ".{0,60}",
            ) {
                prop_assume!(p1 != p2);
                prop_assert_ne!(cache_key(&model, &p1), cache_key(&model, &p2));
                prop_assert_eq!(cache_key(&model, &p1), cache_key(&model, &p1));
            }
        }
    }
}
