use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::CacheItem;
use crate::error::WaitError;
use crate::observability::{CacheCounts, CacheReapStats};
use crate::ports::Clock;
use crate::shard::ShardedMap;
use crate::waiter::WaiterRegistry;

/// Default lifetime of a posted result.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(10 * 60);

struct CacheState {
    items: ShardedMap<CacheItem>,
    waiters: WaiterRegistry<String>,
}

impl CacheState {
    fn live_value(&self, key: &str, now: chrono::DateTime<chrono::Utc>) -> Option<Bytes> {
        self.items
            .get(key)
            .filter(|item| !item.is_expired(now))
            .map(|item| item.value.clone())
    }
}

/// Sharded TTL cache with blocking reads.
pub struct ResultCache {
    state: Mutex<CacheState>,
    clock: Arc<dyn Clock>,
}

impl ResultCache {
    pub fn new(shard_count: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                items: ShardedMap::new(shard_count),
                waiters: WaiterRegistry::new(),
            }),
            clock,
        }
    }

    /// Insert or replace `key` and wake everyone blocked on it.
    ///
    /// A `ttl` of zero keeps the item until it is deleted.
    pub async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state
            .items
            .insert(key.to_string(), CacheItem::new(value, ttl, now));
        state.waiters.wake_all(&key.to_string())
    }

    /// Update the value of an existing item, keeping its TTL.
    ///
    /// Returns false and changes nothing when `key` is absent. Waiters on the
    /// key are woken like for `set`.
    pub async fn cover(&self, key: &str, value: Bytes) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(item) = state.items.get_mut(key) else {
            return false;
        };
        item.cover(value, now);
        state.waiters.wake_all(&key.to_string());
        true
    }

    /// Non-blocking lookup. Expired items read as absent.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        state.live_value(key, now)
    }

    /// Block until `key` has a value, `timeout` elapses, or `cancel` fires.
    ///
    /// `Ok(None)` means the waiter was woken but the key is still absent
    /// (expired, cleared on shutdown); callers treat that as not-found.
    pub async fn await_value(
        &self,
        key: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>, WaitError> {
        let owned_key = key.to_string();
        let waiter = {
            let now = self.clock.now();
            let mut state = self.state.lock().await;
            if let Some(value) = state.live_value(key, now) {
                return Ok(Some(value));
            }
            state.waiters.register(&owned_key)
        };

        let outcome = waiter.wait(Some(timeout), cancel).await;

        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.waiters.deregister(&owned_key, waiter.id());
        outcome?;
        Ok(state.live_value(key, now))
    }

    /// Remove `key`. Its waiters are dropped without being woken.
    pub async fn delete(&self, key: &str) -> bool {
        let mut state = self.state.lock().await;
        let cleared = state.waiters.clear(&key.to_string());
        if cleared > 0 {
            tracing::debug!(key, cleared, "dropped cache waiters on delete");
        }
        state.items.remove(key).is_some()
    }

    /// Wake every waiter, then drop every item. Returns how many waiters were woken.
    pub async fn clear_all(&self) -> usize {
        let mut state = self.state.lock().await;
        let woken = state.waiters.wake_everything();
        state.items.clear();
        woken
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }

    pub async fn counts(&self) -> CacheCounts {
        let state = self.state.lock().await;
        CacheCounts {
            items: state.items.len(),
            waiters: state.waiters.len(),
        }
    }

    /// Drop expired items and wake their waiters, then prune abandoned waiters.
    pub async fn reap(&self) -> CacheReapStats {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let expired = state.items.retain(|_, item| !item.is_expired(now));
        for key in &expired {
            state.waiters.wake_all(key);
        }
        let waiters = state.waiters.prune_abandoned();
        CacheReapStats {
            items: expired.len(),
            waiters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use tokio::time::Instant;

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ))
    }

    fn cache_with(clock: Arc<FixedClock>) -> ResultCache {
        ResultCache::new(16, clock)
    }

    fn cache() -> ResultCache {
        cache_with(clock())
    }

    fn v(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[tokio::test]
    async fn set_get_delete() {
        let cache = cache();
        assert_eq!(cache.get("k").await, None);

        cache.set("k", v("R"), DEFAULT_RESULT_TTL).await;
        assert_eq!(cache.get("k").await, Some(v("R")));

        cache.set("k", v("R2"), DEFAULT_RESULT_TTL).await;
        assert_eq!(cache.get("k").await, Some(v("R2")));
        assert_eq!(cache.len().await, 1);

        assert!(cache.delete("k").await);
        assert!(!cache.delete("k").await);
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn cover_only_updates_existing_items() {
        let cache = cache();
        assert!(!cache.cover("k", v("x")).await);
        assert_eq!(cache.get("k").await, None);

        cache.set("k", v("a"), Duration::ZERO).await;
        assert!(cache.cover("k", v("b")).await);
        assert_eq!(cache.get("k").await, Some(v("b")));
    }

    #[tokio::test]
    async fn expired_items_read_as_absent_and_are_reaped() {
        let clock = clock();
        let cache = cache_with(Arc::clone(&clock));
        cache.set("short", v("a"), Duration::from_secs(10)).await;
        cache.set("forever", v("b"), Duration::ZERO).await;

        clock.advance(Duration::from_secs(11));
        assert_eq!(cache.get("short").await, None);
        assert_eq!(cache.get("forever").await, Some(v("b")));

        let stats = cache.reap().await;
        assert_eq!(stats.items, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn cover_restarts_the_ttl_window() {
        let clock = clock();
        let cache = cache_with(Arc::clone(&clock));
        cache.set("k", v("a"), Duration::from_secs(10)).await;

        clock.advance(Duration::from_secs(8));
        cache.cover("k", v("b")).await;
        clock.advance(Duration::from_secs(8));

        assert_eq!(cache.reap().await.items, 0);
        assert_eq!(cache.get("k").await, Some(v("b")));
    }

    #[tokio::test]
    async fn await_value_returns_immediately_when_present() {
        let cache = cache();
        cache.set("k", v("R"), DEFAULT_RESULT_TTL).await;
        let cancel = CancellationToken::new();
        let got = cache
            .await_value("k", Duration::from_secs(5), &cancel)
            .await;
        assert_eq!(got, Ok(Some(v("R"))));
    }

    #[tokio::test]
    async fn await_value_times_out_no_earlier_than_deadline() {
        let cache = cache();
        let cancel = CancellationToken::new();
        let timeout = Duration::from_millis(100);

        let started = Instant::now();
        let got = cache.await_value("k", timeout, &cancel).await;
        let elapsed = started.elapsed();

        assert_eq!(got, Err(WaitError::Timeout));
        assert!(elapsed >= timeout, "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2));
        assert_eq!(cache.counts().await.waiters, 0);
    }

    #[tokio::test]
    async fn await_value_wakes_on_set() {
        let cache = Arc::new(cache());
        let cancel = CancellationToken::new();

        let waiting = tokio::spawn({
            let cache = Arc::clone(&cache);
            let cancel = cancel.clone();
            async move {
                cache
                    .await_value("job-7", Duration::from_secs(10), &cancel)
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.set("job-7", v("done"), DEFAULT_RESULT_TTL).await, 1);

        let got = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Ok(Some(v("done"))));
        assert_eq!(cache.counts().await.waiters, 0);
    }

    #[tokio::test]
    async fn await_value_is_cancelled_distinctly() {
        let cache = Arc::new(cache());
        let cancel = CancellationToken::new();

        let waiting = tokio::spawn({
            let cache = Arc::clone(&cache);
            let cancel = cancel.clone();
            async move { cache.await_value("k", Duration::from_secs(10), &cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        let got = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Err(WaitError::Cancelled));
        assert_eq!(cache.counts().await.waiters, 0);
    }

    #[tokio::test]
    async fn clear_all_wakes_every_waiter() {
        let cache = Arc::new(cache());
        let cancel = CancellationToken::new();
        cache.set("other", v("x"), Duration::ZERO).await;

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let cache = Arc::clone(&cache);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    cache
                        .await_value(&format!("k{i}"), Duration::from_secs(30), &cancel)
                        .await
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.clear_all().await, 4);
        assert!(cache.is_empty().await);

        for task in tasks {
            let got = tokio::time::timeout(Duration::from_secs(2), task)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got, Ok(None));
        }
    }

    #[tokio::test]
    async fn cover_wakes_waiters() {
        let clock = clock();
        let cache = Arc::new(cache_with(Arc::clone(&clock)));
        let cancel = CancellationToken::new();
        cache.set("k", v("old"), Duration::from_secs(5)).await;
        clock.advance(Duration::from_secs(6));

        // The item is expired but still stored, so the reader blocks on it.
        let waiting = tokio::spawn({
            let cache = Arc::clone(&cache);
            let cancel = cancel.clone();
            async move { cache.await_value("k", Duration::from_secs(10), &cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.counts().await.waiters, 1);

        assert!(cache.cover("k", v("new")).await);
        let got = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Ok(Some(v("new"))));
    }

    #[tokio::test]
    async fn delete_does_not_wake_waiters() {
        let cache = Arc::new(cache());
        let cancel = CancellationToken::new();

        let waiting = tokio::spawn({
            let cache = Arc::clone(&cache);
            let cancel = cancel.clone();
            async move { cache.await_value("k", Duration::from_millis(200), &cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.delete("k").await;

        let got = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Err(WaitError::Timeout));
    }

    #[tokio::test]
    async fn expiry_wakes_waiters_with_nothing() {
        let clock = clock();
        let cache = Arc::new(cache_with(Arc::clone(&clock)));
        let cancel = CancellationToken::new();
        cache.set("k", v("a"), Duration::from_secs(5)).await;
        clock.advance(Duration::from_secs(6));

        // Expired but not yet reaped, so the caller blocks.
        let waiting = tokio::spawn({
            let cache = Arc::clone(&cache);
            let cancel = cancel.clone();
            async move { cache.await_value("k", Duration::from_secs(10), &cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = cache.reap().await;
        assert_eq!(stats.items, 1);

        let got = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Ok(None));
    }
}
