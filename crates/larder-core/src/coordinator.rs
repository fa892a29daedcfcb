//! Single-flight coordination of remote fetches.
//!
//! For each key at most one fetch is outstanding. The first caller becomes
//! the leader and spawns the fetch on its own task; later callers attach to
//! the same result. Because the fetch runs detached, dropping or cancelling
//! any caller (the leader included) never aborts it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::debug;

use crate::error::{RepoError, Result};
use crate::models::Key;

/// Resolves from `None` to `Some(result)` exactly once.
type Slot<T> = watch::Receiver<Option<Result<T>>>;

type InFlightMap<T> = Arc<Mutex<HashMap<Key, Slot<T>>>>;

/// `T` is whatever a fetch produces; the repository coordinates
/// `CacheEntry` values so every caller sees the same `cached_at`.
pub struct FetchCoordinator<T> {
    in_flight: InFlightMap<T>,
}

impl<T> FetchCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, Slot<T>>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of keys with a fetch currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    pub fn is_in_flight(&self, key: &Key) -> bool {
        self.lock().contains_key(key)
    }

    /// Run `fetch` for `key` unless a fetch for it is already in flight, in
    /// which case wait for that one. Every caller gets the same result.
    ///
    /// `fetch` is invoked outside the lock and its future is spawned, so it
    /// must be `Send + 'static`.
    pub async fn coordinate<F, Fut>(&self, key: Key, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (mut slot, leader) = {
            let mut map = self.lock();
            match map.get(&key) {
                Some(slot) => {
                    debug!(key = %key, "Joining in-flight fetch");
                    (slot.clone(), None)
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    map.insert(key.clone(), rx.clone());
                    (rx, Some(tx))
                }
            }
        };

        if let Some(tx) = leader {
            debug!(key = %key, "Starting fetch");
            let guard = InFlightGuard {
                map: Arc::clone(&self.in_flight),
                key: key.clone(),
            };
            let fut = fetch();
            tokio::spawn(async move {
                let result = fut.await;
                // Publish before clearing the marker so a caller that
                // attaches in between still sees the result.
                tx.send_replace(Some(result));
                drop(guard);
            });
        }

        slot.wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|resolved| (*resolved).clone())
            .unwrap_or_else(|| {
                Err(RepoError::Unavailable(format!(
                    "fetch for {} ended without a result",
                    key
                )))
            })
    }
}

impl<T> Default for FetchCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the in-flight marker when the fetch task finishes or unwinds.
struct InFlightGuard<T> {
    map: InFlightMap<T>,
    key: Key,
}

impl<T> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(&self.key);
    }
}
