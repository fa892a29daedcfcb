use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Entity, Key};

/// Errors are one of `NotFound`, `Unavailable` or `ServerError`.
#[async_trait]
pub trait RemoteSource<E: Entity>: Send + Sync {
    async fn fetch(&self, key: &Key) -> Result<E>;

    /// All-or-nothing: a failure yields no partial list.
    async fn fetch_all(&self) -> Result<Vec<E>>;

    async fn create(&self, entity: &E) -> Result<E>;

    async fn update(&self, entity: &E) -> Result<E>;

    async fn delete(&self, key: &Key) -> Result<()>;
}
