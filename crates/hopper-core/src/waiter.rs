//! Keyed waiter registry - blocking reads with broadcast wake-up.
//!
//! # 使い方
//! 1. ロック内で `register(key)` して `Waiter` を受け取る
//! 2. ロックを外して `waiter.notified()` を待つ（cancel / timeout と select）
//! 3. どの経路で抜けても、ロック内で `deregister(key, id)` する
//!
//! A wake uses `Notify::notify_one`, which leaves a permit behind when the
//! waiter has not started polling yet, so a wake that lands between
//! registration and the await is never lost.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::WaitError;

static NEXT_WAITER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique waiter identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

impl WaiterId {
    fn next() -> Self {
        Self(NEXT_WAITER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The blocked caller's half of a registration.
#[derive(Debug)]
pub struct Waiter {
    id: WaiterId,
    notify: Arc<Notify>,
}

impl Waiter {
    pub fn id(&self) -> WaiterId {
        self.id
    }

    /// Resolves once the registry wakes this waiter.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Wait for a wake, racing cancellation and an optional deadline.
    ///
    /// `None` waits until woken or cancelled. Cancellation wins ties so a
    /// closed connection never gets a reply written for it.
    pub async fn wait(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<(), WaitError> {
        let deadline = async {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WaitError::Cancelled),
            _ = self.notified() => Ok(()),
            _ = deadline => Err(WaitError::Timeout),
        }
    }
}

/// All waiters registered against one key.
#[derive(Debug, Default)]
pub struct WaiterSet {
    waiters: HashMap<WaiterId, Arc<Notify>>,
}

impl WaiterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self) -> Waiter {
        let id = WaiterId::next();
        let notify = Arc::new(Notify::new());
        self.waiters.insert(id, Arc::clone(&notify));
        Waiter { id, notify }
    }

    pub fn deregister(&mut self, id: WaiterId) -> bool {
        self.waiters.remove(&id).is_some()
    }

    /// Wake every waiter and empty the set. Returns how many were woken.
    pub fn wake_all(&mut self) -> usize {
        let woken = self.waiters.len();
        for (_, notify) in self.waiters.drain() {
            notify.notify_one();
        }
        woken
    }

    /// Drop waiters whose `Waiter` handle no longer exists. Returns how many were dropped.
    pub fn prune_abandoned(&mut self) -> usize {
        let before = self.waiters.len();
        self.waiters.retain(|_, notify| Arc::strong_count(notify) > 1);
        before - self.waiters.len()
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// key → set of blocked callers.
#[derive(Debug)]
pub struct WaiterRegistry<K> {
    sets: HashMap<K, WaiterSet>,
}

impl<K: Eq + Hash> Default for WaiterRegistry<K> {
    fn default() -> Self {
        Self {
            sets: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> WaiterRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: &K) -> Waiter {
        self.sets.entry(key.clone()).or_default().register()
    }

    /// Remove one waiter; the key's entry goes away with its last waiter.
    pub fn deregister(&mut self, key: &K, id: WaiterId) -> bool {
        let Some(set) = self.sets.get_mut(key) else {
            return false;
        };
        let removed = set.deregister(id);
        if set.is_empty() {
            self.sets.remove(key);
        }
        removed
    }

    /// Broadcast to every waiter on `key` and clear the entry.
    pub fn wake_all(&mut self, key: &K) -> usize {
        self.sets
            .remove(key)
            .map(|mut set| set.wake_all())
            .unwrap_or(0)
    }

    /// Clear the entry for `key` without waking anyone.
    pub fn clear(&mut self, key: &K) -> usize {
        self.sets.remove(key).map(|set| set.len()).unwrap_or(0)
    }

    /// Broadcast to every waiter on every key and empty the registry.
    pub fn wake_everything(&mut self) -> usize {
        self.sets.drain().map(|(_, mut set)| set.wake_all()).sum()
    }

    pub fn prune_abandoned(&mut self) -> usize {
        let mut pruned = 0;
        self.sets.retain(|_, set| {
            pruned += set.prune_abandoned();
            !set.is_empty()
        });
        pruned
    }

    pub fn waiting_on(&self, key: &K) -> usize {
        self.sets.get(key).map(WaiterSet::len).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.sets.values().map(WaiterSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn woken_within(waiter: &Waiter, ms: u64) -> bool {
        tokio::time::timeout(Duration::from_millis(ms), waiter.notified())
            .await
            .is_ok()
    }

    #[tokio::test]
    async fn wake_before_await_is_not_lost() {
        let mut registry = WaiterRegistry::new();
        let waiter = registry.register(&"k".to_string());

        assert_eq!(registry.wake_all(&"k".to_string()), 1);
        assert!(registry.is_empty());
        assert!(woken_within(&waiter, 50).await);
    }

    #[tokio::test]
    async fn wake_all_only_touches_its_key() {
        let mut registry = WaiterRegistry::new();
        let a1 = registry.register(&"a");
        let a2 = registry.register(&"a");
        let b = registry.register(&"b");

        assert_eq!(registry.wake_all(&"a"), 2);
        assert!(woken_within(&a1, 50).await);
        assert!(woken_within(&a2, 50).await);
        assert!(!woken_within(&b, 20).await);
        assert_eq!(registry.waiting_on(&"b"), 1);
    }

    #[tokio::test]
    async fn clear_does_not_wake() {
        let mut registry = WaiterRegistry::new();
        let waiter = registry.register(&"k");

        assert_eq!(registry.clear(&"k"), 1);
        assert!(registry.is_empty());
        assert!(!woken_within(&waiter, 20).await);
    }

    #[tokio::test]
    async fn wake_everything_empties_registry() {
        let mut registry = WaiterRegistry::new();
        let waiters: Vec<_> = (0..5).map(|i| registry.register(&i)).collect();

        assert_eq!(registry.wake_everything(), 5);
        assert!(registry.is_empty());
        for w in &waiters {
            assert!(woken_within(w, 50).await);
        }
    }

    #[tokio::test]
    async fn wait_distinguishes_outcomes() {
        let mut registry = WaiterRegistry::new();
        let cancel = CancellationToken::new();

        let timed_out = registry.register(&"k");
        let err = timed_out
            .wait(Some(Duration::from_millis(20)), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, WaitError::Timeout);

        let woken = registry.register(&"k");
        registry.wake_all(&"k");
        assert_eq!(woken.wait(Some(Duration::from_secs(5)), &cancel).await, Ok(()));

        let cancelled = registry.register(&"k");
        cancel.cancel();
        let err = cancelled.wait(None, &cancel).await.unwrap_err();
        assert_eq!(err, WaitError::Cancelled);
    }

    #[test]
    fn deregister_drops_empty_entry() {
        let mut registry = WaiterRegistry::new();
        let w1 = registry.register(&"k");
        let w2 = registry.register(&"k");

        assert!(registry.deregister(&"k", w1.id()));
        assert_eq!(registry.waiting_on(&"k"), 1);
        assert!(registry.deregister(&"k", w2.id()));
        assert!(registry.is_empty());
        assert!(!registry.deregister(&"k", w2.id()));
    }

    #[test]
    fn prune_abandoned_drops_dropped_handles() {
        let mut registry = WaiterRegistry::new();
        let kept = registry.register(&"k");
        let dropped = registry.register(&"k");
        drop(dropped);

        assert_eq!(registry.prune_abandoned(), 1);
        assert_eq!(registry.waiting_on(&"k"), 1);
        drop(kept);
        assert_eq!(registry.prune_abandoned(), 1);
        assert!(registry.is_empty());
    }
}
