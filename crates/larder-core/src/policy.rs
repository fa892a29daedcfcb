//! Staleness policy: decides whether a cached entry must be refreshed.

use chrono::{DateTime, Duration, Utc};

use crate::cache::CacheEntry;

/// Default maximum age before a cached entry is considered stale.
/// Matches the hourly refresh cadence of slowly-changing directory data.
pub const DEFAULT_MAX_AGE_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessConfig {
    pub max_age: Duration,
}

impl StalenessConfig {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn from_minutes(minutes: i64) -> Self {
        Self::new(Duration::minutes(minutes))
    }
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self::from_minutes(DEFAULT_MAX_AGE_MINUTES)
    }
}

/// A missing entry is stale; otherwise an entry is stale once its age
/// strictly exceeds `max_age`. Entries stamped in the future are fresh.
pub fn is_stale<E>(
    entry: Option<&CacheEntry<E>>,
    config: &StalenessConfig,
    now: DateTime<Utc>,
) -> bool {
    match entry {
        None => true,
        Some(entry) => now - entry.cached_at > config.max_age,
    }
}
