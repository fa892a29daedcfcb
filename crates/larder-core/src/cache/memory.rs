use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;

use super::{CacheEntry, CacheStore, CollectionStream, EntryStream};
use crate::models::{Entity, Key};

struct State<E> {
    entries: BTreeMap<Key, CacheEntry<E>>,
    /// Created on first `observe(key)`, dropped once no receiver is left.
    watchers: HashMap<Key, watch::Sender<Option<CacheEntry<E>>>>,
}

/// In-process cache store.
///
/// Every mutation happens under one lock, and notifications are sent
/// before the lock is released, so observers see writes in the order they
/// were applied. Collection order is key order.
pub struct MemoryCacheStore<E: Entity> {
    state: Mutex<State<E>>,
    all_tx: watch::Sender<Vec<E>>,
}

impl<E: Entity> MemoryCacheStore<E> {
    pub fn new() -> Self {
        Self::with_entries(Vec::new())
    }

    /// Build a store pre-populated with `entries` (last one wins per key).
    pub fn with_entries(entries: Vec<CacheEntry<E>>) -> Self {
        let mut map = BTreeMap::new();
        for entry in entries {
            insert_monotonic(&mut map, entry);
        }
        let snapshot = collect_entities(&map);
        let (all_tx, _) = watch::channel(snapshot);
        Self {
            state: Mutex::new(State {
                entries: map,
                watchers: HashMap::new(),
            }),
            all_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<E>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_entry(&self, key: &Key) -> Option<CacheEntry<E>> {
        self.lock().entries.get(key).cloned()
    }

    /// Snapshot of every entry, in key order.
    pub fn entries(&self) -> Vec<CacheEntry<E>> {
        self.lock().entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Number of per-key watchers, including ones whose subscribers are
    /// gone but which have not been pruned by a write or a new subscription yet.
    pub fn watcher_count(&self) -> usize {
        self.lock().watchers.len()
    }

    pub fn upsert_entry(&self, entry: CacheEntry<E>) {
        let mut state = self.lock();
        let key = insert_monotonic(&mut state.entries, entry);
        self.publish(&mut state, [key]);
    }

    pub fn upsert_entries(&self, entries: Vec<CacheEntry<E>>) {
        if entries.is_empty() {
            return;
        }
        let mut state = self.lock();
        let keys: BTreeSet<Key> = entries
            .into_iter()
            .map(|entry| insert_monotonic(&mut state.entries, entry))
            .collect();
        self.publish(&mut state, keys);
    }

    pub fn delete_entry(&self, key: &Key) {
        let mut state = self.lock();
        if state.entries.remove(key).is_some() {
            self.publish(&mut state, [key.clone()]);
        }
    }

    pub fn delete_entries(&self) {
        let mut state = self.lock();
        if state.entries.is_empty() {
            return;
        }
        let old = std::mem::take(&mut state.entries);
        self.publish(&mut state, old.into_keys());
    }

    pub fn replace_entries(&self, entries: Vec<CacheEntry<E>>) {
        let mut state = self.lock();
        let old = std::mem::take(&mut state.entries);
        let mut affected: BTreeSet<Key> = old.keys().cloned().collect();
        let mut fresh = BTreeMap::new();
        for mut entry in entries {
            let key = entry.key();
            if let Some(previous) = old.get(&key) {
                entry.cached_at = entry.cached_at.max(previous.cached_at);
            }
            fresh.insert(key.clone(), entry);
            affected.insert(key);
        }
        state.entries = fresh;
        self.publish(&mut state, affected);
    }

    pub fn subscribe(&self, key: &Key) -> watch::Receiver<Option<CacheEntry<E>>> {
        let mut state = self.lock();
        state.watchers.retain(|_, tx| tx.receiver_count() > 0);
        let current = state.entries.get(key).cloned();
        match state.watchers.get(key) {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = watch::channel(current);
                state.watchers.insert(key.clone(), tx);
                rx
            }
        }
    }

    pub fn subscribe_all(&self) -> watch::Receiver<Vec<E>> {
        self.all_tx.subscribe()
    }

    /// Push new values to watchers of `keys` and to collection observers.
    fn publish(&self, state: &mut State<E>, keys: impl IntoIterator<Item = Key>) {
        for key in keys {
            let Some(tx) = state.watchers.get(&key) else {
                continue;
            };
            if tx.receiver_count() == 0 {
                state.watchers.remove(&key);
            } else {
                tx.send_replace(state.entries.get(&key).cloned());
            }
        }
        self.all_tx.send_replace(collect_entities(&state.entries));
    }
}

impl<E: Entity> Default for MemoryCacheStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Insert `entry`, keeping `cached_at` from going backwards for its key.
fn insert_monotonic<E: Entity>(map: &mut BTreeMap<Key, CacheEntry<E>>, mut entry: CacheEntry<E>) -> Key {
    let key = entry.key();
    if let Some(existing) = map.get(&key) {
        entry.cached_at = entry.cached_at.max(existing.cached_at);
    }
    map.insert(key.clone(), entry);
    key
}

fn collect_entities<E: Entity>(map: &BTreeMap<Key, CacheEntry<E>>) -> Vec<E> {
    map.values().map(|entry| entry.entity.clone()).collect()
}

/// Turn a watch receiver into an infinite stream that yields the current
/// value first and then every later value. Ends only when the sender is gone.
pub(crate) fn watch_stream<T>(rx: watch::Receiver<T>) -> futures::stream::BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let value = rx.borrow_and_update().clone();
        Some((value, (rx, false)))
    })
    .boxed()
}

#[async_trait]
impl<E: Entity> CacheStore<E> for MemoryCacheStore<E> {
    async fn get(&self, key: &Key) -> Option<CacheEntry<E>> {
        self.get_entry(key)
    }

    async fn upsert(&self, entry: CacheEntry<E>) {
        self.upsert_entry(entry);
    }

    async fn upsert_all(&self, entries: Vec<CacheEntry<E>>) {
        self.upsert_entries(entries);
    }

    async fn delete(&self, key: &Key) {
        self.delete_entry(key);
    }

    async fn delete_all(&self) {
        self.delete_entries();
    }

    async fn replace_all(&self, entries: Vec<CacheEntry<E>>) {
        self.replace_entries(entries);
    }

    fn observe(&self, key: &Key) -> EntryStream<E> {
        watch_stream(self.subscribe(key))
    }

    fn observe_all(&self) -> CollectionStream<E> {
        watch_stream(self.subscribe_all())
    }
}
