//! Process-wide caches keyed by base URL.
//!
//! Entries are never invalidated implicitly, only by [QueryCache::clear].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Minimum and maximum observed value of an integer property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldRange {
    pub min: i64,
    pub max: i64,
}

impl FieldRange {
    /// Range used to size inputs when a database cannot report one.
    pub fn default_for(field: &str) -> Option<Self> {
        match field {
            "nelements" => Some(FieldRange { min: 1, max: 118 }),
            "nsites" => Some(FieldRange { min: 1, max: 1000 }),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    versions: HashMap<String, String>,
    ranges: HashMap<String, BTreeMap<String, FieldRange>>,
    sort_fields: HashMap<String, Vec<String>>,
}

/// Negotiated versions, field ranges and sortable fields per base URL.
///
/// Locks are held only for the duration of a lookup or insert, never across
/// a request.
#[derive(Debug, Default)]
pub struct QueryCache {
    inner: Mutex<CacheInner>,
}

impl QueryCache {
    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The versioned base URL negotiated for `base_url`.
    pub fn version(&self, base_url: &str) -> Option<String> {
        self.lock().versions.get(base_url).cloned()
    }

    pub fn set_version(&self, base_url: &str, versioned_base_url: &str) {
        self.lock()
            .versions
            .insert(base_url.to_string(), versioned_base_url.to_string());
    }

    pub fn range(&self, base_url: &str, field: &str) -> Option<FieldRange> {
        self.lock()
            .ranges
            .get(base_url)
            .and_then(|ranges| ranges.get(field))
            .copied()
    }

    pub fn set_range(&self, base_url: &str, field: &str, range: FieldRange) {
        self.lock()
            .ranges
            .entry(base_url.to_string())
            .or_default()
            .insert(field.to_string(), range);
    }

    pub fn sort_fields(&self, base_url: &str) -> Option<Vec<String>> {
        self.lock().sort_fields.get(base_url).cloned()
    }

    pub fn set_sort_fields(&self, base_url: &str, fields: Vec<String>) {
        self.lock()
            .sort_fields
            .insert(base_url.to_string(), fields);
    }

    pub fn clear(&self) {
        *self.lock() = CacheInner::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_are_kept_per_base_url_and_field() {
        let cache = QueryCache::default();
        let range = FieldRange { min: 2, max: 40 };
        cache.set_range("https://a.org/v1", "nsites", range);

        assert_eq!(cache.range("https://a.org/v1", "nsites"), Some(range));
        assert_eq!(cache.range("https://a.org/v1", "nelements"), None);
        assert_eq!(cache.range("https://b.org/v1", "nsites"), None);
    }

    #[test]
    fn clear_drops_everything() {
        let cache = QueryCache::default();
        cache.set_version("https://a.org", "https://a.org/v1");
        cache.set_sort_fields("https://a.org/v1", vec!["nsites".to_string()]);
        cache.set_range("https://a.org/v1", "nsites", FieldRange { min: 1, max: 2 });

        cache.clear();

        assert_eq!(cache.version("https://a.org"), None);
        assert_eq!(cache.sort_fields("https://a.org/v1"), None);
        assert_eq!(cache.range("https://a.org/v1", "nsites"), None);
    }
}
