//! The offline-first repository.
//!
//! Reads are served from the cache while fresh. Stale or missing entries are
//! refetched through the `FetchCoordinator` and written through to the cache.
//! If the remote is unreachable or failing, any cached entry (of any age) is
//! returned instead. Writes go to the remote first and touch the cache only
//! on success. Observers only ever see cache contents.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::{CacheEntry, CacheStore, CollectionStream, EntryStream};
use crate::clock::{Clock, SystemClock};
use crate::coordinator::FetchCoordinator;
use crate::error::{RepoError, Result};
use crate::models::{Entity, Key};
use crate::policy::{self, StalenessConfig};
use crate::remote::RemoteSource;

/// Coordinator flavour used by the repository: one shared `CacheEntry` per
/// in-flight key.
pub type EntryCoordinator<E> = FetchCoordinator<CacheEntry<E>>;

pub struct Repository<E: Entity> {
    cache: Arc<dyn CacheStore<E>>,
    remote: Arc<dyn RemoteSource<E>>,
    coordinator: Arc<EntryCoordinator<E>>,
    config: StalenessConfig,
    clock: Arc<dyn Clock>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            remote: Arc::clone(&self.remote),
            coordinator: Arc::clone(&self.coordinator),
            config: self.config,
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<E: Entity> Repository<E> {
    pub fn new(
        cache: Arc<dyn CacheStore<E>>,
        remote: Arc<dyn RemoteSource<E>>,
        coordinator: Arc<EntryCoordinator<E>>,
        config: StalenessConfig,
    ) -> Self {
        Self {
            cache,
            remote,
            coordinator,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source used for stamping and staleness checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &StalenessConfig {
        &self.config
    }

    // ===== Reads =====

    pub async fn get(&self, key: &Key) -> Result<E> {
        self.get_entry(key).await.map(CacheEntry::into_entity)
    }

    /// Like `get`, but keeps `cached_at` so callers can tell how old the
    /// value is.
    pub async fn get_entry(&self, key: &Key) -> Result<CacheEntry<E>> {
        let cached = self.cache.get(key).await;

        if let Some(entry) = cached.as_ref() {
            if !policy::is_stale(Some(entry), &self.config, self.clock.now()) {
                debug!(key = %key, "Cache hit");
                return Ok(entry.clone());
            }
        }

        let remote = Arc::clone(&self.remote);
        let cache = Arc::clone(&self.cache);
        let clock = Arc::clone(&self.clock);
        let config = self.config;
        let fetch_key = key.clone();
        let fetched = self
            .coordinator
            .coordinate(key.clone(), move || async move {
                // A fetch that finished after our first read may already
                // have refreshed the entry.
                if let Some(entry) = cache.get(&fetch_key).await {
                    if !policy::is_stale(Some(&entry), &config, clock.now()) {
                        return Ok(entry);
                    }
                }
                let entity = remote.fetch(&fetch_key).await?;
                let entry = CacheEntry::new(entity, clock.now());
                cache.upsert(entry.clone()).await;
                Ok::<_, RepoError>(entry)
            })
            .await;

        match fetched {
            Ok(entry) => Ok(entry),
            Err(err) if err.is_recoverable() => {
                // Prefer whatever is cached now over the snapshot taken above.
                match self.cache.get(key).await.or(cached) {
                    Some(entry) => {
                        debug!(key = %key, "Remote fetch failed, serving cached entry");
                        Ok(entry)
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Cache-only read. Never touches the remote.
    pub async fn cached(&self, key: &Key) -> Option<CacheEntry<E>> {
        self.cache.get(key).await
    }

    pub async fn is_stale(&self, key: &Key) -> bool {
        let entry = self.cache.get(key).await;
        policy::is_stale(entry.as_ref(), &self.config, self.clock.now())
    }

    /// Whether any of `keys` is stale or missing.
    pub async fn any_stale<'a>(&self, keys: impl IntoIterator<Item = &'a Key>) -> bool {
        for key in keys {
            if self.is_stale(key).await {
                return true;
            }
        }
        false
    }

    // ===== Bulk refresh =====

    /// Replace the whole cache with the remote collection. On failure the
    /// cache is left untouched.
    pub async fn refresh_all(&self) -> Result<Vec<E>> {
        let entities = self.remote.fetch_all().await?;
        let now = self.clock.now();
        let entries = entities
            .iter()
            .cloned()
            .map(|entity| CacheEntry::new(entity, now))
            .collect();
        self.cache.replace_all(entries).await;
        info!(count = entities.len(), "Cache replaced from remote");
        Ok(entities)
    }

    // ===== Writes =====

    /// Write through to the remote: `update` if the key is cached, otherwise
    /// `create`. The cache holds whatever the remote returned.
    pub async fn save(&self, entity: E) -> Result<E> {
        if self.cache.get(&entity.key()).await.is_some() {
            self.update(entity).await
        } else {
            self.create(entity).await
        }
    }

    pub async fn create(&self, entity: E) -> Result<E> {
        let saved = self.remote.create(&entity).await?;
        Ok(self.write_through(saved).await)
    }

    pub async fn update(&self, entity: E) -> Result<E> {
        let saved = self.remote.update(&entity).await?;
        Ok(self.write_through(saved).await)
    }

    pub async fn delete(&self, key: &Key) -> Result<()> {
        self.remote.delete(key).await?;
        self.cache.delete(key).await;
        debug!(key = %key, "Deleted");
        Ok(())
    }

    async fn write_through(&self, entity: E) -> E {
        self.cache
            .upsert(CacheEntry::new(entity.clone(), self.clock.now()))
            .await;
        entity
    }

    // ===== Cancellable variants =====

    /// A cancelled call returns `Cancelled`; a shared in-flight fetch keeps
    /// running for other callers and still writes through.
    pub async fn get_cancellable(&self, key: &Key, cancel: &CancellationToken) -> Result<E> {
        cancellable(cancel, self.get(key)).await
    }

    pub async fn save_cancellable(&self, entity: E, cancel: &CancellationToken) -> Result<E> {
        cancellable(cancel, self.save(entity)).await
    }

    pub async fn delete_cancellable(&self, key: &Key, cancel: &CancellationToken) -> Result<()> {
        cancellable(cancel, self.delete(key)).await
    }

    // ===== Observation =====

    pub fn observe(&self, key: &Key) -> EntryStream<E> {
        self.cache.observe(key)
    }

    pub fn observe_all(&self) -> CollectionStream<E> {
        self.cache.observe_all()
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RepoError::Cancelled),
        result = operation => result,
    }
}
