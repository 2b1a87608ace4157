//! Time-boxed memoization in front of slow or rate-limited sources.
//!
//! A [`TtlCache`] serves a value while it is younger than the cache's TTL and
//! refills it synchronously otherwise. A failed or empty refill never
//! replaces a previous value: the stale value is served instead.
//!
//! The lock is not held while a refill runs, so readers of other keys are
//! never blocked by a slow source. Two callers that hit the same expired key
//! at once may both refill; the later fill wins.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

/// One cached value and when it was filled.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: Option<V>,
    /// `None` until the first successful fill.
    pub filled_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        match (&self.value, self.filled_at) {
            (Some(_), Some(at)) => now.duration_since(at) < ttl,
            _ => false,
        }
    }
}

/// A keyed cache with a single TTL for all keys.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached value for `key`, refilling it first if it is missing
    /// or at least `ttl` old.
    ///
    /// `refill` yields `Ok(Some(v))` on success. `Ok(None)` (nothing usable)
    /// and `Err(_)` keep the previous value, which is then returned stale; with
    /// no previous value the result is `None`.
    pub async fn get_or_refresh<F, Fut, E>(&self, key: K, refill: F) -> Option<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: Display,
    {
        let stale = {
            let entries = self.entries();
            match entries.get(&key) {
                Some(entry) if entry.is_fresh(self.ttl, Instant::now()) => {
                    debug!("{} cache hit for {:?}", self.name, key);
                    return entry.value.clone();
                }
                Some(entry) => entry.value.clone(),
                None => None,
            }
        };

        debug!("{} cache refill for {:?}", self.name, key);
        match refill().await {
            Ok(Some(value)) => {
                self.entries().insert(
                    key,
                    CacheEntry {
                        value: Some(value.clone()),
                        filled_at: Some(Instant::now()),
                    },
                );
                Some(value)
            }
            Ok(None) => {
                warn!(
                    "{} refill for {:?} returned nothing, keeping previous value",
                    self.name, key
                );
                stale
            }
            Err(e) => {
                warn!(
                    "{} refill for {:?} failed: {}, keeping previous value",
                    self.name, key, e
                );
                stale
            }
        }
    }

    /// The cached value regardless of age, without refilling.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.entries().get(key).and_then(|e| e.value.clone())
    }

    /// Age of the cached value, if there is one.
    pub fn age(&self, key: &K) -> Option<Duration> {
        self.entries()
            .get(key)
            .and_then(|e| e.filled_at)
            .map(|at| at.elapsed())
    }

    /// Forget `key` so the next read refills.
    pub fn invalidate(&self, key: &K) {
        self.entries().remove(key);
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::advance;

    type Refill = std::result::Result<Option<u32>, String>;

    async fn counted(calls: &AtomicU32, result: Refill) -> Refill {
        calls.fetch_add(1, Ordering::SeqCst);
        result
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_until_ttl() {
        let cache: TtlCache<(), u32> = TtlCache::new("weather", Duration::from_secs(900));
        let calls = AtomicU32::new(0);

        assert_eq!(cache.get_or_refresh((), || counted(&calls, Ok(Some(1)))).await, Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        advance(Duration::from_secs(899)).await;
        assert_eq!(cache.get_or_refresh((), || counted(&calls, Ok(Some(2)))).await, Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get_or_refresh((), || counted(&calls, Ok(Some(2)))).await, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_value_on_failed_refill() {
        let cache: TtlCache<(), u32> = TtlCache::new("weather", Duration::from_secs(900));
        let calls = AtomicU32::new(0);

        cache.get_or_refresh((), || counted(&calls, Ok(Some(7)))).await;
        advance(Duration::from_secs(900)).await;

        let value = cache
            .get_or_refresh((), || counted(&calls, Err("HTTP 503".to_string())))
            .await;
        assert_eq!(value, Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // still expired, so the next read tries again
        let value = cache.get_or_refresh((), || counted(&calls, Ok(None))).await;
        assert_eq!(value, Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_previous_value() {
        let cache: TtlCache<(), u32> = TtlCache::new("devices", Duration::from_secs(1800));

        let value = cache
            .get_or_refresh((), || async { Err::<Option<u32>, _>("offline") })
            .await;
        assert_eq!(value, None);
        assert_eq!(cache.peek(&()), None);

        // a failed first fill does not count as filled
        let value = cache
            .get_or_refresh((), || async { Ok::<_, String>(Some(3)) })
            .await;
        assert_eq!(value, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let cache: TtlCache<String, u32> = TtlCache::new("weather", Duration::from_secs(900));
        let calls = AtomicU32::new(0);

        cache
            .get_or_refresh("KTNMEMPH176".into(), || counted(&calls, Ok(Some(1))))
            .await;
        cache
            .get_or_refresh("KTNMEMPH177".into(), || counted(&calls, Ok(Some(2))))
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.peek(&"KTNMEMPH176".to_string()), Some(1));
        assert_eq!(cache.peek(&"KTNMEMPH177".to_string()), Some(2));

        cache.invalidate(&"KTNMEMPH176".to_string());
        assert_eq!(cache.peek(&"KTNMEMPH176".to_string()), None);
        assert_eq!(cache.peek(&"KTNMEMPH177".to_string()), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_instances_do_not_share_state() {
        let devices: TtlCache<(), u32> = TtlCache::new("devices", Duration::from_secs(1800));
        let weather: TtlCache<(), u32> = TtlCache::new("weather", Duration::from_secs(900));

        devices.get_or_refresh((), || async { Ok::<_, String>(Some(10)) }).await;
        weather.get_or_refresh((), || async { Ok::<_, String>(Some(20)) }).await;

        advance(Duration::from_secs(1000)).await;
        let calls = AtomicU32::new(0);
        assert_eq!(devices.get_or_refresh((), || counted(&calls, Ok(Some(11)))).await, Some(10));
        assert_eq!(weather.get_or_refresh((), || counted(&calls, Ok(Some(21)))).await, Some(21));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(devices.age(&()), Some(Duration::from_secs(1000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_refill_does_not_block_other_keys() {
        let cache = Arc::new(TtlCache::<u32, u32>::new("slow", Duration::from_secs(60)));

        let slow = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_refresh(1, || async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok::<_, String>(Some(1))
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let start = Instant::now();
        let fast = cache
            .get_or_refresh(2, || async { Ok::<_, String>(Some(2)) })
            .await;
        assert_eq!(fast, Some(2));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(slow.await.unwrap(), Some(1));
    }
}
