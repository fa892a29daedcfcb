use async_trait::async_trait;
use futures::stream::BoxStream;

use super::CacheEntry;
use crate::models::{Entity, Key};

/// Infinite stream of a single key's entry; yields the current value first.
pub type EntryStream<E> = BoxStream<'static, Option<CacheEntry<E>>>;

/// Infinite stream of the whole collection; yields the current value first.
pub type CollectionStream<E> = BoxStream<'static, Vec<E>>;

/// Local key-value storage for cached entities.
///
/// Implementations must be safe under concurrent use and never fail
/// observably: storage problems degrade to "not found" and are logged by
/// the implementation.
#[async_trait]
pub trait CacheStore<E: Entity>: Send + Sync {
    async fn get(&self, key: &Key) -> Option<CacheEntry<E>>;

    /// Replace-on-conflict by key.
    async fn upsert(&self, entry: CacheEntry<E>);

    async fn upsert_all(&self, entries: Vec<CacheEntry<E>>);

    /// Deleting an absent key is a no-op.
    async fn delete(&self, key: &Key);

    async fn delete_all(&self);

    /// Delete everything and insert `entries` as one write. Collection
    /// observers never see the intermediate empty state.
    async fn replace_all(&self, entries: Vec<CacheEntry<E>>);

    fn observe(&self, key: &Key) -> EntryStream<E>;

    fn observe_all(&self) -> CollectionStream<E>;
}
