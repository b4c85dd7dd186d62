use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        RwLock,
    },
};
use tracing::debug;

type Key = (String, String);

/// Cached procedure results, keyed by procedure name and serialized input.
///
/// Every entry remembers the session epoch it was fetched under; lookups
/// under a different epoch miss, so results never cross a login boundary.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<Key, (Value, u64)>>,
    invalidations: AtomicUsize,
}

impl ResultCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, procedure: &str, input: &Value, epoch: u64) -> Option<Value> {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries
            .get(&key(procedure, input))
            .filter(|(_, cached_epoch)| *cached_epoch == epoch)
            .map(|(value, _)| value.clone())
    }

    pub fn put(&self, procedure: &str, input: &Value, epoch: u64, value: Value) {
        let mut entries = self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(key(procedure, input), (value, epoch));
    }

    /// Drop every cached result.
    pub fn invalidate_all(&self) {
        let mut entries = self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let dropped = entries.len();
        entries.clear();
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        debug!(dropped, "Result cache invalidated");
    }

    /// How many times [`invalidate_all`](Self::invalidate_all) ran.
    #[must_use]
    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn key(procedure: &str, input: &Value) -> Key {
    (procedure.to_string(), input.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hits_only_under_the_same_epoch() {
        let cache = ResultCache::new();
        cache.put("notes.list", &json!({"page": 1}), 3, json!(["a"]));

        assert_eq!(cache.get("notes.list", &json!({"page": 1}), 3), Some(json!(["a"])));
        assert_eq!(cache.get("notes.list", &json!({"page": 1}), 4), None);
        assert_eq!(cache.get("notes.list", &json!({"page": 2}), 3), None);
        assert_eq!(cache.get("notes.other", &json!({"page": 1}), 3), None);
    }

    #[test]
    fn invalidate_all_empties_and_counts() {
        let cache = ResultCache::new();
        cache.put("a", &Value::Null, 1, json!(1));
        cache.put("b", &Value::Null, 1, json!(2));
        assert_eq!(cache.len(), 2);

        cache.invalidate_all();
        assert!(cache.is_empty());
        assert_eq!(cache.invalidation_count(), 1);
    }
}
