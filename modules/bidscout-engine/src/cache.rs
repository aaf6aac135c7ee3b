//! In-run key-value cache with per-domain time-to-live.
//!
//! Every key is derived from the canonical `SearchIdentity` (or the
//! identity-derived category for shop selection) — never a raw listing
//! title — so semantically-identical products hit the same entry despite
//! title noise. Entries are evicted lazily on read, not swept.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheDomain {
    /// Structured extraction results per identity.
    Extraction,
    /// Web-search price lookups. Short-lived, prices move.
    WebPrice,
    /// Bundle classification verdicts.
    BundleClass,
    /// Shop selection per category. Stable for weeks.
    ShopSelection,
}

impl CacheDomain {
    pub fn ttl(&self) -> Duration {
        match self {
            CacheDomain::Extraction => Duration::hours(24),
            CacheDomain::WebPrice => Duration::hours(6),
            CacheDomain::BundleClass => Duration::days(7),
            CacheDomain::ShopSelection => Duration::days(30),
        }
    }
}

struct CacheEntry {
    value: serde_json::Value,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct RunCache {
    entries: RwLock<HashMap<(CacheDomain, String), CacheEntry>>,
}

impl RunCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed lookup. Returns None on miss or expiry; expired entries are
    /// removed on the way out.
    pub fn get<T: DeserializeOwned>(&self, domain: CacheDomain, key: &str) -> Option<T> {
        let map_key = (domain, key.to_string());
        {
            let entries = self.entries.read().expect("cache lock poisoned");
            let entry = entries.get(&map_key)?;
            if entry.created_at + domain.ttl() > Utc::now() {
                return serde_json::from_value(entry.value.clone()).ok();
            }
        }
        // Expired — evict under the write lock, then report a miss.
        self.entries
            .write()
            .expect("cache lock poisoned")
            .remove(&map_key);
        None
    }

    /// Store a value. Last write wins; entries are idempotent recomputations.
    pub fn put<T: Serialize>(&self, domain: CacheDomain, key: &str, value: &T) {
        let json = match serde_json::to_value(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(?domain, key, error = %e, "Value not serializable, not cached");
                return;
            }
        };
        self.entries.write().expect("cache lock poisoned").insert(
            (domain, key.to_string()),
            CacheEntry {
                value: json,
                created_at: Utc::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_within_ttl() {
        let cache = RunCache::new();
        cache.put(CacheDomain::WebPrice, "airpods pro gen2", &219.0);
        let value: Option<f64> = cache.get(CacheDomain::WebPrice, "airpods pro gen2");
        assert_eq!(value, Some(219.0));
    }

    #[test]
    fn domains_do_not_collide() {
        let cache = RunCache::new();
        cache.put(CacheDomain::WebPrice, "k", &1.0);
        assert_eq!(cache.get::<f64>(CacheDomain::Extraction, "k"), None);
    }

    #[test]
    fn expired_entry_is_lazily_evicted() {
        let cache = RunCache::new();
        cache.put(CacheDomain::WebPrice, "stale", &99.0);
        // Backdate the entry past its TTL.
        {
            let mut entries = cache.entries.write().unwrap();
            let entry = entries
                .get_mut(&(CacheDomain::WebPrice, "stale".to_string()))
                .unwrap();
            entry.created_at = Utc::now() - Duration::hours(7);
        }
        assert_eq!(cache.get::<f64>(CacheDomain::WebPrice, "stale"), None);
        // The read removed it.
        assert!(cache.is_empty());
    }

    #[test]
    fn last_write_wins() {
        let cache = RunCache::new();
        cache.put(CacheDomain::ShopSelection, "audio", &"shop-a");
        cache.put(CacheDomain::ShopSelection, "audio", &"shop-b");
        let value: Option<String> = cache.get(CacheDomain::ShopSelection, "audio");
        assert_eq!(value.as_deref(), Some("shop-b"));
    }
}
