use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{CacheEntry, CacheStore, CollectionStream, EntryStream, MemoryCacheStore};
use crate::models::{Entity, Key};

/// Cache store persisted as a single JSON file per collection.
///
/// The file holds a list of `CacheEntry` values. It is read once at open and
/// rewritten after every mutation; reads and subscriptions are served from
/// the in-memory mirror.
pub struct JsonFileCacheStore<E: Entity> {
    path: PathBuf,
    memory: MemoryCacheStore<E>,
    /// Serializes mutate-then-persist so the file never lags an older write.
    write_lock: Mutex<()>,
}

impl<E> JsonFileCacheStore<E>
where
    E: Entity + Serialize + DeserializeOwned,
{
    /// Open (or create) `<cache_dir>/<name>.json`.
    ///
    /// An unreadable or corrupt file is treated as an empty cache.
    pub fn open(cache_dir: impl Into<PathBuf>, name: &str) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory: {}", cache_dir.display()))?;
        let path = cache_dir.join(format!("{}.json", name));

        let entries = match load::<E>(&path) {
            Ok(Some(entries)) => {
                debug!(cache = name, count = entries.len(), "Loaded cache file");
                entries
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                debug!(cache = name, error = %e, "Failed to load cache file, starting empty");
                Vec::new()
            }
        };

        Ok(Self {
            path,
            memory: MemoryCacheStore::with_entries(entries),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply a change to the mirror, then rewrite the file on the blocking
    /// pool. The write lock is held until the file is replaced.
    async fn mutate(&self, apply: impl FnOnce(&MemoryCacheStore<E>) + Send) {
        let _guard = self.write_lock.lock().await;
        apply(&self.memory);

        let contents = match serde_json::to_string_pretty(&self.memory.entries()) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to serialize cache");
                return;
            }
        };
        let path = self.path.clone();
        match tokio::task::spawn_blocking(move || save(&path, contents)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(path = %self.path.display(), error = %e, "Failed to persist cache file")
            }
            Err(e) => warn!(path = %self.path.display(), error = %e, "Cache write task failed"),
        }
    }
}

fn load<E: DeserializeOwned>(path: &Path) -> Result<Option<Vec<CacheEntry<E>>>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read cache file: {}", path.display()))?;

    let entries: Vec<CacheEntry<E>> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse cache file: {}", path.display()))?;

    Ok(Some(entries))
}

fn save(path: &Path, contents: String) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl<E> CacheStore<E> for JsonFileCacheStore<E>
where
    E: Entity + Serialize + DeserializeOwned,
{
    async fn get(&self, key: &Key) -> Option<CacheEntry<E>> {
        self.memory.get_entry(key)
    }

    async fn upsert(&self, entry: CacheEntry<E>) {
        self.mutate(|m| m.upsert_entry(entry)).await;
    }

    async fn upsert_all(&self, entries: Vec<CacheEntry<E>>) {
        self.mutate(|m| m.upsert_entries(entries)).await;
    }

    async fn delete(&self, key: &Key) {
        self.mutate(|m| m.delete_entry(key)).await;
    }

    async fn delete_all(&self) {
        self.mutate(|m| m.delete_entries()).await;
    }

    async fn replace_all(&self, entries: Vec<CacheEntry<E>>) {
        self.mutate(|m| m.replace_entries(entries)).await;
    }

    fn observe(&self, key: &Key) -> EntryStream<E> {
        self.memory.observe(key)
    }

    fn observe_all(&self) -> CollectionStream<E> {
        self.memory.observe_all()
    }
}
