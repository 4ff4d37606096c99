//! A cache that only accepts keys and values from its own scope.
//!
//! Every operation checks that the key (and on `set`, the value) carries the
//! cache's scope, so one tenant's cached retrieval cannot be read through
//! another tenant's key. Concurrent writers to the same key are last-write-wins;
//! wrap the cache in a lock if that matters.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MullionError, Result};
use crate::owned::{Owned, ScopeName};

/// A `(scope, key)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub scope: ScopeName,
    pub key: String,
}

impl CacheKey {
    pub fn new(scope: impl Into<ScopeName>, key: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            key: key.into(),
        }
    }
}

/// Options for [`ScopedCache`].
#[derive(Debug, Clone)]
pub struct ScopedCacheOptions {
    /// Reject foreign-scope keys and values. Disabling this stops the
    /// rejection only; entries stay keyed by `(scope, key)`. Logged once at
    /// construction.
    pub strict: bool,
    /// Entries older than this are invisible and purged lazily.
    pub ttl: Option<Duration>,
    /// When full, the oldest entry is evicted.
    pub max_entries: Option<usize>,
}

impl Default for ScopedCacheOptions {
    fn default() -> Self {
        Self {
            strict: true,
            ttl: None,
            max_entries: None,
        }
    }
}

impl ScopedCacheOptions {
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max.max(1));
        self
    }
}

#[derive(Debug, Clone)]
struct Entry<T> {
    value: Owned<T>,
    inserted: Instant,
    seq: u64,
}

/// Cache bound to a single scope.
#[derive(Debug, Clone)]
pub struct ScopedCache<T> {
    scope: ScopeName,
    options: ScopedCacheOptions,
    entries: HashMap<CacheKey, Entry<T>>,
    next_seq: u64,
}

impl<T> ScopedCache<T> {
    pub fn new(scope: impl Into<ScopeName>) -> Self {
        Self::with_options(scope, ScopedCacheOptions::default())
    }

    pub fn with_options(scope: impl Into<ScopeName>, options: ScopedCacheOptions) -> Self {
        let scope = scope.into();
        if !options.strict {
            warn!(scope = %scope, "scoped cache created with scope enforcement disabled");
        }
        Self {
            scope,
            options,
            entries: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn scope(&self) -> &ScopeName {
        &self.scope
    }

    /// Key in this cache's scope.
    pub fn key(&self, key: impl Into<String>) -> CacheKey {
        CacheKey::new(self.scope.clone(), key)
    }

    fn check_scope(&self, operation: &'static str, found: &ScopeName) -> Result<()> {
        if self.options.strict && found != &self.scope {
            warn!(
                cache_scope = %self.scope,
                found = %found,
                operation,
                "scoped cache rejected foreign scope"
            );
            return Err(MullionError::CacheScopeViolation {
                operation,
                cache_scope: self.scope.to_string(),
                found: found.to_string(),
            });
        }
        Ok(())
    }

    fn is_live(&self, entry: &Entry<T>) -> bool {
        self.options
            .ttl
            .is_none_or(|ttl| entry.inserted.elapsed() < ttl)
    }

    /// Insert or replace. Both the key and the value must carry the cache scope.
    pub fn set(&mut self, key: &CacheKey, value: Owned<T>) -> Result<()> {
        self.check_scope("set", &key.scope)?;
        self.check_scope("set", value.scope())?;

        if let Some(max) = self.options.max_entries {
            if self.entries.len() >= max && !self.entries.contains_key(key) {
                self.evict_oldest();
            }
        }
        self.next_seq += 1;
        self.entries.insert(
            key.clone(),
            Entry {
                value,
                inserted: Instant::now(),
                seq: self.next_seq,
            },
        );
        Ok(())
    }

    pub fn get(&self, key: &CacheKey) -> Result<Option<&Owned<T>>> {
        self.check_scope("get", &key.scope)?;
        Ok(self
            .entries
            .get(key)
            .filter(|entry| self.is_live(entry))
            .map(|entry| &entry.value))
    }

    pub fn has(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Remove an entry, returning whether a live one existed.
    pub fn delete(&mut self, key: &CacheKey) -> Result<bool> {
        self.check_scope("delete", &key.scope)?;
        let live = match self.entries.remove(key) {
            Some(entry) => self.is_live(&entry),
            None => false,
        };
        Ok(live)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop expired entries and return how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let Some(ttl) = self.options.ttl else {
            return 0;
        };
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.inserted.elapsed() < ttl);
        before - self.entries.len()
    }

    /// Live entry count.
    pub fn len(&self) -> usize {
        self.entries.values().filter(|e| self.is_live(e)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries
            .iter()
            .filter(|(_, e)| self.is_live(e))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.seq)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_in_scope() {
        let mut cache = ScopedCache::new("tenant-a");
        let key = cache.key("doc-1");
        cache.set(&key, Owned::new("summary", "tenant-a")).unwrap();
        assert!(cache.has(&key).unwrap());
        assert_eq!(cache.get(&key).unwrap().map(|o| *o.value_ref()), Some("summary"));
        assert!(cache.delete(&key).unwrap());
        assert!(!cache.has(&key).unwrap());
    }

    #[test]
    fn test_foreign_key_rejected() {
        let mut cache: ScopedCache<&str> = ScopedCache::new("tenant-a");
        let foreign = CacheKey::new("tenant-b", "doc-1");
        for err in [
            cache.get(&foreign).map(|_| ()).unwrap_err(),
            cache.has(&foreign).map(|_| ()).unwrap_err(),
            cache.delete(&foreign).map(|_| ()).unwrap_err(),
            cache.set(&foreign, Owned::new("x", "tenant-a")).unwrap_err(),
        ] {
            assert!(matches!(err, MullionError::CacheScopeViolation { .. }));
        }
    }

    #[test]
    fn test_foreign_value_rejected() {
        let mut cache = ScopedCache::new("tenant-a");
        let key = cache.key("doc-1");
        let err = cache.set(&key, Owned::new("leak", "tenant-b")).unwrap_err();
        assert!(err.to_string().contains("tenant-b"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_non_strict_allows_foreign() {
        let mut cache = ScopedCache::with_options("a", ScopedCacheOptions::default().strict(false));
        let key = CacheKey::new("b", "k");
        cache.set(&key, Owned::new(1, "b")).unwrap();
        assert!(cache.has(&key).unwrap());
    }

    #[test]
    fn test_non_strict_keeps_scopes_apart() {
        let mut cache = ScopedCache::with_options(
            "tenant-a",
            ScopedCacheOptions::default().strict(false),
        );
        let a_doc = CacheKey::new("tenant-a", "doc");
        let b_doc = CacheKey::new("tenant-b", "doc");
        cache.set(&a_doc, Owned::new("A-secret", "tenant-a")).unwrap();

        assert!(cache.get(&b_doc).unwrap().is_none());
        assert!(!cache.delete(&b_doc).unwrap());

        cache.set(&b_doc, Owned::new("B-notes", "tenant-b")).unwrap();
        assert_eq!(cache.get(&a_doc).unwrap().map(|o| *o.value_ref()), Some("A-secret"));
        assert_eq!(cache.get(&b_doc).unwrap().map(|o| *o.value_ref()), Some("B-notes"));

        let mut keys = cache.keys();
        keys.sort_by(|x, y| x.scope.as_str().cmp(y.scope.as_str()));
        assert_eq!(keys, vec![a_doc, b_doc]);
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = ScopedCache::with_options(
            "a",
            ScopedCacheOptions::default().ttl(Duration::from_millis(0)),
        );
        let key = cache.key("k");
        cache.set(&key, Owned::new(1, "a")).unwrap();
        assert!(!cache.has(&key).unwrap());
        assert_eq!(cache.purge_expired(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let options = ScopedCacheOptions::default().max_entries(2);
        let mut cache = ScopedCache::with_options("a", options);
        for k in ["one", "two", "three"] {
            let key = cache.key(k);
            cache.set(&key, Owned::new(k, "a")).unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.has(&cache.key("one")).unwrap());
        assert!(cache.has(&cache.key("three")).unwrap());
    }
}
