//! An in-process keyed single-permit synchronizer (§4.E). Used to collapse
//! identical concurrent cold-cache loads, e.g. a per-tenant JWKS fetch: while
//! one task holds the permit for a key, other tasks asking for the same key
//! queue behind a `tokio::sync::Mutex` instead of duplicating the work.
//!
//! Scope is process-local: this gives no cross-node guarantee, unlike the
//! DB advisory locks used by the TUS cross-node lock (§4.K).

use std::{
    collections::HashMap,
    hash::Hash,
    sync::Arc,
};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{
    Mutex as AsyncMutex,
    OwnedMutexGuard,
};

struct Entry {
    mutex: Arc<AsyncMutex<()>>,
    refcount: usize,
}

#[derive(Clone)]
pub struct KeyedMutex<K> {
    entries: Arc<SyncMutex<HashMap<K, Entry>>>,
}

impl<K> Default for KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(SyncMutex::new(HashMap::new())),
        }
    }

    /// Acquire the single permit for `key`. The returned guard releases the
    /// permit and, if no other waiter is left, removes the map entry when
    /// dropped.
    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        let mutex = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                mutex: Arc::new(AsyncMutex::new(())),
                refcount: 0,
            });
            entry.refcount += 1;
            entry.mutex.clone()
        };
        let guard = mutex.lock_owned().await;
        KeyGuard {
            key,
            guard: Some(guard),
            entries: self.entries.clone(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Held while the permit for `key` is owned. Dropping it releases the permit
/// and decrements the entry's refcount, removing the map entry at zero.
pub struct KeyGuard<K: Eq + Hash + Clone> {
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    entries: Arc<SyncMutex<HashMap<K, Entry>>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        self.guard.take();
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.refcount -= 1;
            if entry.refcount == 0 {
                entries.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{
            AtomicUsize,
            Ordering,
        },
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn concurrent_same_key_waits_then_releases() {
        let mutex: KeyedMutex<&'static str> = KeyedMutex::new();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..5 {
            let mutex = mutex.clone();
            let concurrent = concurrent.clone();
            let max_concurrent = max_concurrent.clone();
            handles.push(tokio::spawn(async move {
                let _guard = mutex.lock("tenant-jwks").await;
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entry_is_removed_once_all_waiters_release() {
        let mutex: KeyedMutex<&'static str> = KeyedMutex::new();
        {
            let _guard = mutex.lock("k").await;
            assert_eq!(mutex.len(), 1);
        }
        assert_eq!(mutex.len(), 0);
    }
}
