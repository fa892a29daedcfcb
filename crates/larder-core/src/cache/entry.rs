use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Entity, Key};

/// A cached entity stamped with the time it was written.
///
/// Entries are replaced wholesale on update, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<E> {
    pub entity: E,
    pub cached_at: DateTime<Utc>,
}

impl<E> CacheEntry<E> {
    pub fn new(entity: E, cached_at: DateTime<Utc>) -> Self {
        Self { entity, cached_at }
    }

    pub fn into_entity(self) -> E {
        self.entity
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.cached_at).num_minutes()
    }

    /// Age rounded to the nearest whole unit, half a unit rounding up
    /// ("1h 30m" shows as "2h ago").
    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        match self.age_minutes(now) {
            // Negative when another writer's clock runs ahead of ours
            m if m < 1 => "just now".to_string(),
            m if m < MINUTES_PER_HOUR => format!("{}m ago", m),
            m if m < MINUTES_PER_DAY => format!("{}h ago", round_half_up(m, MINUTES_PER_HOUR)),
            m => format!("{}d ago", round_half_up(m, MINUTES_PER_DAY)),
        }
    }
}

const MINUTES_PER_HOUR: i64 = 60;
const MINUTES_PER_DAY: i64 = 24 * MINUTES_PER_HOUR;

fn round_half_up(minutes: i64, unit: i64) -> i64 {
    (minutes + unit / 2) / unit
}

impl<E: Entity> CacheEntry<E> {
    pub fn key(&self) -> Key {
        self.entity.key()
    }
}
