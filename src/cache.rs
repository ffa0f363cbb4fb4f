use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use moka::future::Cache as MokaCache;
use tracing::trace;

use crate::error::CacheError;

/// A concurrent `key -> Arc<V>` map with at-most-one-construction per key
/// and a release hook invoked when an entry leaves the cache.
///
/// This is C6 from spec §4.1, built on `moka::future::Cache` — the
/// per-key coalescing primitive the corpus reaches for whenever several
/// callers may race to populate the same cache slot (see
/// `feature-flags/src/cohorts/cohort_cache_manager.rs`'s `CohortCacheManager`,
/// and the teacher's own `kafka-deduplicator/Cargo.toml` dependency on
/// `moka`). `try_get_with` gives single-flight construction for free:
/// concurrent callers for an absent key await the same future, and a
/// failed build is not cached, so the next caller retries.
///
/// The lifecycle is
/// `absent -> loading (single builder, others await it) -> ready -> released`;
/// a release (explicit `remove`, eviction, or `close`) always starts a
/// fresh generation for that key (spec invariant I5), since moka treats a
/// removed key as absent again.
pub struct LoadingCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    cache: MokaCache<K, Arc<V>>,
    closed: Arc<AtomicBool>,
}

impl<K, V> Clone for LoadingCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<K, V> LoadingCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Builds an unbounded cache that does nothing extra on release.
    pub fn new() -> Self {
        Self::with_release_hook(|_, _| {})
    }

    pub fn with_release_hook(on_release: impl Fn(&K, &Arc<V>) + Send + Sync + 'static) -> Self {
        let cache = MokaCache::builder()
            .eviction_listener(move |key: Arc<K>, value: Arc<V>, _cause| {
                on_release(&key, &value);
            })
            .build();
        Self {
            cache,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// As `with_release_hook`, but caps the cache at `max_size` entries,
    /// evicting via moka's own admission/eviction policy once over
    /// capacity and calling the same release hook as an explicit
    /// `remove` (SPEC_FULL §5's "bounded cache" supplement).
    pub fn bounded(
        max_size: u64,
        on_release: impl Fn(&K, &Arc<V>) + Send + Sync + 'static,
    ) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(max_size)
            .eviction_listener(move |key: Arc<K>, value: Arc<V>, _cause| {
                on_release(&key, &value);
            })
            .build();
        Self {
            cache,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the cached value for `key`, building it with `build` if
    /// absent. Concurrent callers for the same key observe the same
    /// construction; if `build` fails, the slot is left empty so the
    /// next call starts a fresh attempt. `moka` wraps the build error in
    /// an `Arc` to hand it to every coalesced waiter, so it is
    /// re-flattened into a fresh `anyhow::Error` here rather than cloned
    /// out of the `Arc` (`anyhow::Error` itself isn't `Clone`).
    pub async fn get_or_create<F, Fut>(&self, key: K, build: F) -> Result<Arc<V>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }

        trace!("awaiting cache entry construction");
        self.cache
            .try_get_with(key, async move { build().await.map(Arc::new) })
            .await
            .map_err(|arc_err: Arc<anyhow::Error>| {
                CacheError::BuildFailed(anyhow::anyhow!(arc_err.to_string()))
            })
    }

    /// Removes `key`, calling the release hook if it was (or becomes)
    /// ready. Idempotent; a build in flight is not aborted, but this
    /// call runs moka's pending maintenance so the hook still fires
    /// before returning.
    pub async fn remove(&self, key: &K) {
        self.cache.invalidate(key);
        self.cache.run_pending_tasks().await;
    }

    /// A snapshot of entries that had finished publishing by the time
    /// this call ran its maintenance pass. Unlike the spec's idealized
    /// description, a key whose construction is still in flight is not
    /// observed here — `moka` only iterates entries already inserted
    /// into its map, with no handle onto concurrent `try_get_with`
    /// futures to await. In practice this never matters for
    /// `PartitionFlow`: every key touched by the current batch is fully
    /// built (via `fetch_or_build`) before `values()` is ever called.
    pub async fn values(&self) -> Vec<(K, Arc<V>)>
    where
        K: Clone,
    {
        self.cache.run_pending_tasks().await;
        self.cache.iter().map(|(k, v)| ((*k).clone(), v)).collect()
    }

    /// Releases every live entry and marks the cache closed: further
    /// `get_or_create` calls fail with `CacheError::Closed`.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }
}

impl<K, V> Default for LoadingCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn builds_once_per_key() {
        let cache: LoadingCache<&'static str, u32> = LoadingCache::new();
        let builds = Arc::new(AtomicUsize::new(0));

        let b = builds.clone();
        let v1 = cache
            .get_or_create("a", || async move {
                b.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await
            .unwrap();

        let b = builds.clone();
        let v2 = cache
            .get_or_create("a", || async move {
                b.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .await
            .unwrap();

        assert_eq!(*v1, 1);
        assert_eq!(*v2, 1);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_get_or_create_builds_exactly_once() {
        let cache: Arc<LoadingCache<&'static str, u32>> = Arc::new(LoadingCache::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let builds = builds.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_create("k", || async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        builds.fetch_add(1, Ordering::SeqCst);
                        Ok(99)
                    })
                    .await
                    .unwrap()
            }));
        }

        for h in handles {
            assert_eq!(*h.await.unwrap(), 99);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_build_allows_retry() {
        let cache: LoadingCache<&'static str, u32> = LoadingCache::new();

        let err = cache
            .get_or_create("a", || async { Err(anyhow::anyhow!("boom")) })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::BuildFailed(_)));

        let value = cache
            .get_or_create("a", || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(*value, 7);
    }

    #[tokio::test]
    async fn remove_invokes_release_hook_and_is_idempotent() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let released_clone = released.clone();
        let cache: LoadingCache<&'static str, u32> =
            LoadingCache::with_release_hook(move |k, v| {
                released_clone.lock().unwrap().push((*k, **v));
            });

        cache.get_or_create("a", || async { Ok(1) }).await.unwrap();
        cache.remove(&"a").await;
        cache.remove(&"a").await;

        assert_eq!(*released.lock().unwrap(), vec![("a", 1)]);
    }

    #[tokio::test]
    async fn remove_after_release_starts_new_generation() {
        let cache: LoadingCache<&'static str, u32> = LoadingCache::new();
        let builds = Arc::new(AtomicUsize::new(0));

        let b = builds.clone();
        cache
            .get_or_create("a", || async move {
                b.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await
            .unwrap();
        cache.remove(&"a").await;

        let b = builds.clone();
        let v = cache
            .get_or_create("a", || async move {
                b.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .await
            .unwrap();

        assert_eq!(*v, 2);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn values_snapshot_includes_ready_entries_only_from_before_the_call() {
        let cache: LoadingCache<u32, u32> = LoadingCache::new();
        cache.get_or_create(1, || async { Ok(10) }).await.unwrap();
        cache.get_or_create(2, || async { Ok(20) }).await.unwrap();

        let snapshot = cache.values().await;
        cache.get_or_create(3, || async { Ok(30) }).await.unwrap();

        let mut keys: Vec<u32> = snapshot.iter().map(|(k, _)| *k).collect();
        keys.sort();
        assert_eq!(keys, vec![1, 2]);
    }

    #[tokio::test]
    async fn values_does_not_observe_a_build_still_in_flight() {
        let cache: Arc<LoadingCache<&'static str, u32>> = Arc::new(LoadingCache::new());

        let cache_for_build = cache.clone();
        let build_task = tokio::spawn(async move {
            cache_for_build
                .get_or_create("a", || async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(5)
                })
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        let mid_flight = cache.values().await;
        build_task.await.unwrap();
        let after_build = cache.values().await;

        assert!(mid_flight.is_empty());
        assert_eq!(after_build, vec![("a", Arc::new(5))]);
    }

    #[tokio::test]
    async fn closed_cache_rejects_new_builds_and_releases_live_entries() {
        let released = Arc::new(AtomicUsize::new(0));
        let released_clone = released.clone();
        let cache: LoadingCache<&'static str, u32> =
            LoadingCache::with_release_hook(move |_, _| {
                released_clone.fetch_add(1, Ordering::SeqCst);
            });

        cache.get_or_create("a", || async { Ok(1) }).await.unwrap();
        cache.close().await;

        assert_eq!(released.load(Ordering::SeqCst), 1);
        let err = cache.get_or_create("b", || async { Ok(2) }).await.unwrap_err();
        assert!(matches!(err, CacheError::Closed));
    }

    #[tokio::test]
    async fn bounded_cache_evicts_down_to_capacity() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let released_clone = released.clone();
        let cache: LoadingCache<u32, u32> = LoadingCache::bounded(2, move |k, _| {
            released_clone.lock().unwrap().push(*k);
        });

        cache.get_or_create(1, || async { Ok(1) }).await.unwrap();
        cache.values().await;
        cache.get_or_create(2, || async { Ok(2) }).await.unwrap();
        cache.values().await;
        // touch 1 so 2 becomes the least-recently-used entry
        cache.get_or_create(1, || async { Ok(1) }).await.unwrap();
        cache.values().await;
        cache.get_or_create(3, || async { Ok(3) }).await.unwrap();

        let keys: Vec<u32> = {
            let mut ks: Vec<u32> = cache.values().await.into_iter().map(|(k, _)| k).collect();
            ks.sort();
            ks
        };
        assert_eq!(keys.len(), 2, "cache stays at its configured capacity");
        assert!(!released.lock().unwrap().is_empty(), "over-capacity insert released an entry");
    }
}
