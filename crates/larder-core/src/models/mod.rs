//! Data models for repository entities.
//!
//! - `Key`: opaque identifier used to index the cache and in-flight fetches
//! - `Entity`: anything the repository can cache, identified by a `Key`
//! - `Restaurant`: the reference entity served by the `larder` CLI

pub mod key;
pub mod restaurant;

pub use key::{Entity, Key};
pub use restaurant::Restaurant;
