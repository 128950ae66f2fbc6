//! Victim selection shared by every layer implementation.

use claimcache_core::cache::{CacheEntry, LayerSettings};

/// Keys to evict so the layer fits its budget again.
///
/// Victims are taken in eviction-policy order. The entry just written
/// (`incoming`) is spared unless it alone still exceeds the budget.
pub fn select_victims<'a>(
    entries: impl Iterator<Item = &'a CacheEntry>,
    settings: &LayerSettings,
    incoming: &str,
) -> Vec<String> {
    let mut ordered: Vec<&CacheEntry> = entries.collect();
    let mut count = ordered.len();
    let mut bytes: u64 = ordered.iter().map(|e| e.size_bytes).sum();

    if !settings.over_budget(count, bytes) {
        return vec![];
    }

    ordered.sort_by(|a, b| settings.eviction.compare(a, b));

    let mut victims = Vec::new();
    for entry in ordered {
        if !settings.over_budget(count, bytes) {
            break;
        }
        if entry.key == incoming {
            continue;
        }
        victims.push(entry.key.clone());
        count -= 1;
        bytes = bytes.saturating_sub(entry.size_bytes);
    }

    if settings.over_budget(count, bytes) {
        victims.push(incoming.to_string());
    }
    victims
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimcache_core::cache::EvictionPolicy;
    use serde_json::json;

    fn settings(max_entries: usize, max_size_bytes: u64, eviction: EvictionPolicy) -> LayerSettings {
        LayerSettings {
            default_ttl_secs: None,
            max_entries,
            max_size_bytes,
            eviction,
        }
    }

    #[test]
    fn within_budget_evicts_nothing() {
        let entries = vec![CacheEntry::new("a", json!(1))];
        let s = settings(5, 0, EvictionPolicy::Oldest);
        assert!(select_victims(entries.iter(), &s, "a").is_empty());
    }

    #[test]
    fn least_hit_goes_first() {
        let mut popular = CacheEntry::new("popular", json!(1));
        popular.hits = 9;
        let cold = CacheEntry::new("cold", json!(1));
        let incoming = CacheEntry::new("incoming", json!(1));
        let entries = vec![popular, cold, incoming];

        let s = settings(2, 0, EvictionPolicy::LeastHit);
        assert_eq!(select_victims(entries.iter(), &s, "incoming"), vec!["cold"]);
    }

    #[test]
    fn oversized_incoming_is_dropped() {
        let big = CacheEntry::new("big", json!("x".repeat(200)));
        let entries = vec![big];
        let s = settings(0, 100, EvictionPolicy::LowestQuality);
        assert_eq!(select_victims(entries.iter(), &s, "big"), vec!["big"]);
    }
}
