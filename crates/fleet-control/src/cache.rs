//! Memoized derived facts, flushed by table invalidation
//!
//! A [`LocalFactCache`] belongs to one table. Any committed change to that
//! table clears the whole cache; there is no per-key eviction. A loader that
//! was already running when the flush happened does not get to store its
//! result afterwards, since it may have read the pre-commit state.

use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fleet_core::{FleetError, FleetResult, InvalidationRecord, TableId};

use crate::invalidation::{InvalidationBus, InvalidationSubscriber};

struct CacheState<K, V> {
    entries: HashMap<K, V>,
    generation: u64,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the map
    pub hits: u64,
    /// Lookups that ran the loader
    pub misses: u64,
    /// Times the cache was flushed
    pub invalidations: u64,
    /// Entries currently held
    pub entries: usize,
}

/// Memoizing cache owned by one table
pub struct LocalFactCache<K, V> {
    table: TableId,
    state: Mutex<CacheState<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl<K, V> LocalFactCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Empty cache owned by `table`
    pub fn new(table: TableId) -> Self {
        Self {
            table,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                generation: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Cached value for `key`, computing it with `loader` on a miss
    ///
    /// The lock is not held while the loader runs, so concurrent misses for
    /// one key may each load; the last store wins.
    pub fn get<F>(&self, key: &K, loader: F) -> V
    where
        F: FnOnce(&K) -> V,
    {
        match self.get_or_try(key, |k| Ok::<V, std::convert::Infallible>(loader(k))) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Fallible variant of [`get`](Self::get); errors are not cached
    pub fn get_or_try<F, E>(&self, key: &K, loader: F) -> Result<V, E>
    where
        F: FnOnce(&K) -> Result<V, E>,
    {
        let generation = {
            let state = self.state.lock();
            if let Some(value) = state.entries.get(key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value.clone());
            }
            state.generation
        };
        self.misses.fetch_add(1, Ordering::Relaxed);

        let value = loader(key)?;

        let mut state = self.state.lock();
        if state.generation == generation {
            state.entries.insert(key.clone(), value.clone());
        } else {
            tracing::trace!(table = %self.table, "discarding value loaded across an invalidation");
        }
        Ok(value)
    }

    /// Drop every entry
    pub fn invalidate_all(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.generation += 1;
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Owning table
    pub fn table(&self) -> &TableId {
        &self.table
    }

    /// Entries currently held
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl<K, V> InvalidationSubscriber for LocalFactCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn on_invalidate(&self, record: &InvalidationRecord) {
        tracing::trace!(table = %record.table, "local fact cache flushed");
        self.invalidate_all();
    }
}

impl<K, V> std::fmt::Debug for LocalFactCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFactCache")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

struct RegisteredCache {
    table: TableId,
    handle: Arc<dyn Any + Send + Sync>,
    flush: Arc<dyn InvalidationSubscriber>,
}

/// Every fact cache of the process, each subscribed to the bus
pub struct CacheRegistry {
    bus: Arc<InvalidationBus>,
    caches: RwLock<HashMap<String, RegisteredCache>>,
}

impl CacheRegistry {
    /// Registry whose caches subscribe to `bus`
    pub fn new(bus: Arc<InvalidationBus>) -> Self {
        Self {
            bus,
            caches: RwLock::new(HashMap::new()),
        }
    }

    /// Create the named cache for `table`, or return it if it already exists
    ///
    /// Asking for an existing name with different key or value types, or a
    /// different table, is an error.
    pub fn register<K, V>(
        &self,
        name: impl Into<String>,
        table: TableId,
    ) -> FleetResult<Arc<LocalFactCache<K, V>>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let name = name.into();
        let mut caches = self.caches.write();
        if let Some(existing) = caches.get(&name) {
            if existing.table != table {
                return Err(FleetError::invalid(format!(
                    "cache '{name}' is already registered for {}",
                    existing.table
                )));
            }
            return Arc::clone(&existing.handle)
                .downcast::<LocalFactCache<K, V>>()
                .map_err(|_| {
                    FleetError::invalid(format!("cache '{name}' registered with other types"))
                });
        }

        let cache = Arc::new(LocalFactCache::<K, V>::new(table.clone()));
        self.bus.subscribe(table.clone(), cache.clone());
        tracing::debug!(cache = %name, %table, "fact cache registered");
        caches.insert(
            name,
            RegisteredCache {
                table,
                handle: cache.clone(),
                flush: cache.clone(),
            },
        );
        Ok(cache)
    }

    /// Look up a registered cache
    pub fn get<K, V>(&self, name: &str) -> Option<Arc<LocalFactCache<K, V>>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let handle = Arc::clone(&self.caches.read().get(name)?.handle);
        handle.downcast::<LocalFactCache<K, V>>().ok()
    }

    /// Flush every registered cache
    pub fn clear_all(&self) {
        for (name, cache) in self.caches.read().iter() {
            tracing::debug!(cache = %name, "flushing fact cache");
            cache
                .flush
                .on_invalidate(&InvalidationRecord::everything(cache.table.clone(), false));
        }
    }

    /// Registered cache names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("caches", &self.names())
            .finish()
    }
}
