//! Offline-first repository core.
//!
//! Reconciles a slow or unreliable remote source with a fast local cache
//! behind one read/write/observe API:
//!
//! - `cache`: `CacheStore` trait with in-memory and JSON-file stores
//! - `remote`: `RemoteSource` trait with a REST implementation
//! - `policy`: staleness decision for cached entries
//! - `coordinator`: single-flight deduplication of remote fetches
//! - `repository`: the orchestrator tying them together
//! - `config`: host configuration (remote URL, cache location, max age)

pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod policy;
pub mod remote;
pub mod repository;

pub use cache::{CacheEntry, CacheStore, JsonFileCacheStore, MemoryCacheStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use coordinator::FetchCoordinator;
pub use error::{RepoError, Result};
pub use models::{Entity, Key, Restaurant};
pub use policy::{is_stale, StalenessConfig};
pub use remote::{HttpRemoteSource, RemoteSource};
pub use repository::{EntryCoordinator, Repository};
