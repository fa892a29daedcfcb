//! Plain-text rendering for restaurants and cache entries.

use chrono::{DateTime, Utc};
use larder_core::{CacheEntry, Restaurant};

const NAME_WIDTH: usize = 28;
const CUISINE_WIDTH: usize = 14;

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

pub fn row(restaurant: &Restaurant) -> String {
    format!(
        "{:<10} {:<name$} {:<cuisine$} {}",
        truncate(&restaurant.id, 10),
        truncate(&restaurant.name, NAME_WIDTH),
        truncate(restaurant.cuisine.as_deref().unwrap_or("-"), CUISINE_WIDTH),
        restaurant.display_rating(),
        name = NAME_WIDTH,
        cuisine = CUISINE_WIDTH,
    )
}

pub fn header() -> String {
    format!(
        "{:<10} {:<name$} {:<cuisine$} {}",
        "ID",
        "NAME",
        "CUISINE",
        "RATING",
        name = NAME_WIDTH,
        cuisine = CUISINE_WIDTH,
    )
}

pub fn detail(entry: &CacheEntry<Restaurant>, now: DateTime<Utc>) -> String {
    let r = &entry.entity;
    let mut lines = vec![format!("{} ({})", r.name, r.id)];
    if let Some(ref cuisine) = r.cuisine {
        lines.push(format!("  Cuisine: {}", cuisine));
    }
    if let Some(ref address) = r.address {
        lines.push(format!("  Address: {}", address));
    }
    lines.push(format!("  Rating:  {}", r.display_rating()));
    lines.push(format!("  Cached:  {}", entry.age_display(now)));
    lines.join("\n")
}
