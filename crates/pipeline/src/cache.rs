//! Supporting Caches (C8): the URL-text cache and the tenant-config cache.
//! Both share the same TTL/early-refresh policy (15 min full, 3 min early)
//! and the same shape — an in-memory map plus a per-key async lock so
//! concurrent first-loads (or concurrent early-refreshes) for the same key
//! collapse into one upstream fetch. The phoneme-pattern cache (also part
//! of C8) lives in `tts::phoneme` since it's intrinsically TTS-specific.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

const DEFAULT_FULL_TTL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_EARLY_REFRESH_AT: Duration = Duration::from_secs(3 * 60);

struct CacheEntry<V> {
    value: V,
    loaded_at: Instant,
}

/// A single early-refreshing TTL cache keyed by `K`. A hit older than
/// `full_ttl - early_refresh_at` is still returned immediately, but the
/// caller's loader is also kicked off in the background so the *next*
/// request sees fresh data without anyone paying the latency inline. A hit
/// older than `full_ttl` is a miss.
///
/// Callers hold this behind an `Arc` so the background refresh task can
/// share the same entry map.
pub struct TtlCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    load_locks: DashMap<K, Arc<AsyncMutex<()>>>,
    full_ttl: Duration,
    early_refresh_at: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Builds a cache with the default policy (15 min full TTL, 3 min
    /// early-refresh window).
    pub fn new() -> Arc<Self> {
        Self::with_policy(DEFAULT_FULL_TTL, DEFAULT_EARLY_REFRESH_AT)
    }

    /// Builds a cache with an explicit TTL policy, e.g. from
    /// `config::CacheConfig`.
    pub fn with_policy(full_ttl: Duration, early_refresh_at: Duration) -> Arc<Self> {
        Arc::new(TtlCache {
            entries: DashMap::new(),
            load_locks: DashMap::new(),
            full_ttl,
            early_refresh_at,
        })
    }

    /// Returns the cached value for `key`, loading it via `loader` on a
    /// miss and kicking off a background refresh on an early-refresh hit.
    /// A loader failure on a miss propagates to the caller; a loader
    /// failure on a background refresh is logged and the stale value is
    /// left in place — a cache read failure degrades to a miss, never an
    /// error.
    pub async fn get_or_load<F, Fut, E>(self: &Arc<Self>, key: K, loader: F) -> Result<V, E>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        if let Some(entry) = self.entries.get(&key) {
            let age = entry.loaded_at.elapsed();
            if age < self.full_ttl {
                let value = entry.value.clone();
                if age >= self.full_ttl.saturating_sub(self.early_refresh_at) {
                    self.spawn_refresh(key.clone(), loader);
                }
                return Ok(value);
            }
        }

        let lock = self
            .load_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(entry) = self.entries.get(&key) {
            if entry.loaded_at.elapsed() < self.full_ttl {
                return Ok(entry.value.clone());
            }
        }

        let value = loader().await?;
        self.entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                loaded_at: Instant::now(),
            },
        );
        Ok(value)
    }

    fn spawn_refresh<F, Fut, E>(self: &Arc<Self>, key: K, loader: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        let lock = self
            .load_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        if lock.try_lock().is_err() {
            // a refresh (or a concurrent miss-load) is already in flight
            return;
        }

        let cache = self.clone();
        tokio::spawn(async move {
            let _guard = lock.lock().await;
            match loader().await {
                Ok(value) => {
                    cache.entries.insert(
                        key,
                        CacheEntry {
                            value,
                            loaded_at: Instant::now(),
                        },
                    );
                }
                Err(err) => {
                    tracing::warn!(error = %err, "background cache refresh failed, keeping stale value");
                }
            }
        });
    }
}

/// Whether a URL looks like one of the templated text assets this cache is
/// meant for (prompts, lexicons, phoneme dictionaries) rather than a
/// one-off asset URL that should always be fetched fresh.
pub fn is_cache_worthy_url(url: &str) -> bool {
    const KEYWORDS: &[&str] = &["template", "prompt", "system", "affirmation", "validator"];
    const EXTENSIONS: &[&str] = &[".txt", ".md", ".json"];
    let lower = url.to_ascii_lowercase();
    KEYWORDS.iter().any(|k| lower.contains(k)) || EXTENSIONS.iter().any(|e| lower.ends_with(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cache_worthy_url_matches_keyword_or_extension() {
        assert!(is_cache_worthy_url("https://assets/system-prompt.txt"));
        assert!(is_cache_worthy_url("https://assets/validator.json"));
        assert!(is_cache_worthy_url("https://assets/affirmation-en.md"));
        assert!(!is_cache_worthy_url("https://assets/logo.png"));
    }

    #[tokio::test]
    async fn get_or_load_caches_after_first_load() {
        let cache: Arc<TtlCache<String, u32>> = TtlCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let loader = move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, String>(42)
            }
        };

        let first = cache.get_or_load("k".to_string(), loader.clone()).await.unwrap();
        let second = cache.get_or_load("k".to_string(), loader).await.unwrap();
        assert_eq!(first, 42);
        assert_eq!(second, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_or_load_propagates_loader_error_on_miss() {
        let cache: Arc<TtlCache<String, u32>> = TtlCache::new();
        let result = cache
            .get_or_load("k".to_string(), || async { Err::<u32, String>("boom".into()) })
            .await;
        assert!(result.is_err());
    }
}
