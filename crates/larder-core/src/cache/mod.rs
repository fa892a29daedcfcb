//! Local cache stores for offline data access.
//!
//! The `CacheStore` trait is the repository's view of local storage. Two
//! implementations ship here:
//! - `MemoryCacheStore`: process-local, backs every reactive subscription
//! - `JsonFileCacheStore`: persists the collection as a JSON file so cached
//!   data survives restarts and remains readable offline

pub mod entry;
pub mod file;
pub mod memory;
pub mod store;

pub use entry::CacheEntry;
pub use file::JsonFileCacheStore;
pub use memory::MemoryCacheStore;
pub use store::{CacheStore, CollectionStream, EntryStream};
