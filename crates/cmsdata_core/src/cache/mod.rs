//! Cache-aside layer consulted by repositories around storage reads.
//!
//! # Responsibility
//! - Define the narrow cache contract repositories depend on.
//! - Provide an in-process implementation, a disabled one, and a view that
//!   confines keys to one database.
//!
//! # Invariants
//! - Repositories receive a `CacheHandle` by injection; only the composition
//!   boundary may reach for `shared_runtime_cache()`.
//! - Writes are last-write-wins and safe to race; staleness is bounded by
//!   explicit invalidation on every repository write path.
//! - Cached values are never handed out as shared mutable state; repositories
//!   clone them before returning.

use once_cell::sync::Lazy;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Type-erased cached value (an entity clone or a result set).
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// Shared cache handle passed into repositories.
pub type CacheHandle = Arc<dyn RepositoryCache>;

/// Get/put/clear façade in front of storage reads.
pub trait RepositoryCache: Send + Sync + Debug {
    fn get(&self, key: &str) -> Option<CachedValue>;
    fn put(&self, key: &str, value: CachedValue);
    fn clear(&self, key: &str);
    /// Drops every entry whose key starts with `prefix`.
    fn clear_prefix(&self, prefix: &str);
}

/// Key of one entity: `<entity_type>:id:<id>`.
pub fn entity_key(entity_type: &str, id: i64) -> String {
    format!("{entity_type}:id:{id}")
}

/// Key of one query result set: `<entity_type>:query:<fingerprint>`.
pub fn query_key(entity_type: &str, fingerprint: &str) -> String {
    format!("{entity_type}:query:{fingerprint}")
}

/// Prefix shared by all query result sets of one entity type.
pub fn query_prefix(entity_type: &str) -> String {
    format!("{entity_type}:query:")
}

/// Prefix shared by every entry of one entity type.
pub fn type_prefix(entity_type: &str) -> String {
    format!("{entity_type}:")
}

/// Drops the entity's own entry (when it has an identity) and every cached
/// query result of its type.
pub fn invalidate_entity(cache: &dyn RepositoryCache, entity_type: &str, id: Option<i64>) {
    if let Some(id) = id {
        cache.clear(&entity_key(entity_type, id));
    }
    cache.clear_prefix(&query_prefix(entity_type));
}

/// Cache that always misses and ignores writes.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCache;

impl DisabledCache {
    pub fn handle() -> CacheHandle {
        Arc::new(Self)
    }
}

impl RepositoryCache for DisabledCache {
    fn get(&self, _key: &str) -> Option<CachedValue> {
        None
    }

    fn put(&self, _key: &str, _value: CachedValue) {}

    fn clear(&self, _key: &str) {}

    fn clear_prefix(&self, _prefix: &str) {}
}

/// Hit/miss counters of a [`MemoryCache`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// In-process cache guarded by a mutex.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CachedValue>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle() -> CacheHandle {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedValue>> {
        // Map operations never leave the map half-written.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("stats", &self.stats())
            .finish()
    }
}

impl RepositoryCache for MemoryCache {
    fn get(&self, key: &str) -> Option<CachedValue> {
        let value = self.lock().get(key).cloned();
        let counter = if value.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    fn put(&self, key: &str, value: CachedValue) {
        self.lock().insert(key.to_string(), value);
    }

    fn clear(&self, key: &str) {
        self.lock().remove(key);
    }

    fn clear_prefix(&self, prefix: &str) {
        self.lock().retain(|key, _| !key.starts_with(prefix));
    }
}

/// View of another cache whose keys are confined to one scope.
///
/// Providers over different databases sharing one cache each see their own
/// entries; `clear_prefix` never reaches past the scope.
#[derive(Debug, Clone)]
pub struct ScopedCache {
    scope: String,
    inner: CacheHandle,
}

impl ScopedCache {
    pub fn new(scope: impl Into<String>, inner: CacheHandle) -> Self {
        Self {
            scope: scope.into(),
            inner,
        }
    }

    pub fn handle(scope: impl Into<String>, inner: CacheHandle) -> CacheHandle {
        Arc::new(Self::new(scope, inner))
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}|{key}", self.scope)
    }
}

impl RepositoryCache for ScopedCache {
    fn get(&self, key: &str) -> Option<CachedValue> {
        self.inner.get(&self.scoped(key))
    }

    fn put(&self, key: &str, value: CachedValue) {
        self.inner.put(&self.scoped(key), value);
    }

    fn clear(&self, key: &str) {
        self.inner.clear(&self.scoped(key));
    }

    fn clear_prefix(&self, prefix: &str) {
        self.inner.clear_prefix(&self.scoped(prefix));
    }
}

static RUNTIME_CACHE: Lazy<Arc<MemoryCache>> = Lazy::new(|| Arc::new(MemoryCache::new()));

/// Process-wide cache for composition roots (binaries, services).
///
/// Library code must take a `CacheHandle` parameter instead of calling this.
/// Keys are not scoped to a database; attach it through
/// `UnitOfWorkProvider::with_shared_cache`, which wraps it in a [`ScopedCache`].
pub fn shared_runtime_cache() -> CacheHandle {
    Arc::clone(&*RUNTIME_CACHE) as CacheHandle
}

#[cfg(test)]
mod tests {
    use super::{
        entity_key, query_key, query_prefix, type_prefix, CacheHandle, CachedValue,
        DisabledCache, MemoryCache, RepositoryCache, ScopedCache,
    };
    use std::sync::Arc;

    fn value(text: &str) -> CachedValue {
        Arc::new(text.to_string())
    }

    #[test]
    fn disabled_cache_always_misses() {
        let cache = DisabledCache;
        cache.put("k", value("v"));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn memory_cache_round_trips_and_counts() {
        let cache = MemoryCache::new();
        assert!(cache.get("user_type:id:1").is_none());
        cache.put("user_type:id:1", value("editor"));

        let hit = cache.get("user_type:id:1").unwrap();
        assert_eq!(hit.downcast_ref::<String>().unwrap(), "editor");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn last_write_wins() {
        let cache = MemoryCache::new();
        cache.put("k", value("first"));
        cache.put("k", value("second"));
        let hit = cache.get("k").unwrap();
        assert_eq!(hit.downcast_ref::<String>().unwrap(), "second");
    }

    #[test]
    fn clear_prefix_only_touches_matching_keys() {
        let cache = MemoryCache::new();
        cache.put(&entity_key("user_type", 1), value("a"));
        cache.put(&query_key("user_type", "*"), value("b"));
        cache.put(&entity_key("user_group", 1), value("c"));

        cache.clear_prefix(&query_prefix("user_type"));
        assert!(cache.contains_key(&entity_key("user_type", 1)));
        assert!(!cache.contains_key(&query_key("user_type", "*")));

        cache.clear_prefix(&type_prefix("user_type"));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key(&entity_key("user_group", 1)));
    }

    #[test]
    fn shared_cache_is_safe_across_threads() {
        let cache = Arc::new(MemoryCache::new());
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for round in 0..50 {
                        cache.put("shared", value(&format!("{worker}-{round}")));
                        cache.clear(&format!("other-{round}"));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(cache.get("shared").is_some());
    }

    #[test]
    fn scoped_views_share_storage_without_sharing_keys() {
        let shared = Arc::new(MemoryCache::new());
        let handle: CacheHandle = shared.clone();
        let first = ScopedCache::new("a.db", Arc::clone(&handle));
        let second = ScopedCache::new("b.db", handle);

        first.put(&entity_key("user_type", 1), value("editor"));
        second.put(&entity_key("user_type", 1), value("writer"));
        assert_eq!(shared.len(), 2);

        let hit = first.get(&entity_key("user_type", 1)).unwrap();
        assert_eq!(hit.downcast_ref::<String>().unwrap(), "editor");

        second.clear_prefix(&type_prefix("user_type"));
        assert!(second.get(&entity_key("user_type", 1)).is_none());
        assert!(first.get(&entity_key("user_type", 1)).is_some());
    }
}
