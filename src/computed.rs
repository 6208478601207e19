//! Memoized values derived from store contents.
//!
//! A derivation declares what it read (record ids and whole kinds). The cache
//! keeps a reverse index from each dependency to the memo keys that read it,
//! so a committed diff invalidates only the memos it touches.

use crate::diff::Diff;
use crate::store::Store;
use crate::subscriptions::{ChangeFilter, ListenerId};
use crate::types::{Epoch, RecordId};
use lru::LruCache;
use parking_lot::Mutex;
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Something a derived value depends on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dependency {
    Record(RecordId),
    /// Any record of this kind (including ones created later).
    Type(String),
}

/// A derived value together with what it read.
#[derive(Clone, Debug)]
pub struct Derivation<V> {
    value: V,
    deps: HashSet<Dependency>,
}

impl<V> Derivation<V> {
    pub fn new(value: V) -> Self {
        Self {
            value,
            deps: HashSet::new(),
        }
    }

    /// Declare reads of individual records.
    pub fn reading<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Borrow<RecordId>,
    {
        for id in ids {
            self.deps.insert(Dependency::Record(id.borrow().clone()));
        }
        self
    }

    /// Declare a read of every record of `type_name`.
    pub fn reading_type(mut self, type_name: impl Into<String>) -> Self {
        self.deps.insert(Dependency::Type(type_name.into()));
        self
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn dependencies(&self) -> &HashSet<Dependency> {
        &self.deps
    }
}

/// Computed cache configuration.
#[derive(Clone, Debug)]
pub struct ComputedCacheConfig {
    /// Max memoized entries; least recently used are evicted.
    /// Default: 1024
    pub capacity: usize,
}

impl Default for ComputedCacheConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Hit/miss counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

struct Memo<V> {
    value: V,
    deps: HashSet<Dependency>,
    epoch: Epoch,
}

struct CacheState<K: Hash + Eq, V> {
    memos: LruCache<K, Memo<V>>,
    dependents: HashMap<Dependency, HashSet<K>>,
    hits: u64,
    misses: u64,
}

impl<K: Hash + Eq + Clone, V: Clone> CacheState<K, V> {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            memos: LruCache::new(capacity),
            dependents: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    fn lookup(&mut self, key: &K) -> Option<V> {
        let value = self.memos.get(key).map(|memo| memo.value.clone());
        if value.is_some() {
            self.hits += 1;
        }
        value
    }

    fn insert(&mut self, key: K, memo: Memo<V>) {
        self.forget(&key);
        for dep in &memo.deps {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(key.clone());
        }
        if let Some((evicted, old)) = self.memos.push(key, memo) {
            self.unlink(&evicted, &old.deps);
        }
    }

    /// Drop a memo and its reverse-index entries.
    fn forget(&mut self, key: &K) -> bool {
        match self.memos.pop(key) {
            Some(memo) => {
                self.unlink(key, &memo.deps);
                true
            }
            None => false,
        }
    }

    fn unlink(&mut self, key: &K, deps: &HashSet<Dependency>) {
        for dep in deps {
            if let Some(keys) = self.dependents.get_mut(dep) {
                keys.remove(key);
                if keys.is_empty() {
                    self.dependents.remove(dep);
                }
            }
        }
    }

    /// Drop every memo that read something in `diff`.
    fn invalidate(&mut self, diff: &Diff) -> usize {
        let mut stale: HashSet<K> = HashSet::new();
        for id in diff.touched_ids() {
            if let Some(keys) = self.dependents.get(&Dependency::Record(id.clone())) {
                stale.extend(keys.iter().cloned());
            }
        }
        for type_name in diff.touched_types() {
            if let Some(keys) = self.dependents.get(&Dependency::Type(type_name.to_string())) {
                stale.extend(keys.iter().cloned());
            }
        }

        for key in &stale {
            self.forget(key);
        }
        stale.len()
    }

    fn clear(&mut self) {
        self.memos.clear();
        self.dependents.clear();
    }
}

/// Function that derives a value for a key from the store.
pub type DeriveFn<'s, K, V> = Box<dyn Fn(&Store, &K) -> Derivation<V> + Send + Sync + 's>;

/// A keyed, lazily recomputed view over a [`Store`].
///
/// `get` returns the memo if none of its dependencies changed since it was
/// derived, and derives anew otherwise. The cache listens to the store and
/// unregisters when dropped.
pub struct ComputedCache<'s, K: Hash + Eq, V> {
    store: &'s Store,
    derive: DeriveFn<'s, K, V>,
    state: Arc<Mutex<CacheState<K, V>>>,
    listener: ListenerId,
}

impl<'s, K, V> ComputedCache<'s, K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn define<F>(store: &'s Store, derive: F) -> Self
    where
        F: Fn(&Store, &K) -> Derivation<V> + Send + Sync + 's,
    {
        Self::with_config(store, ComputedCacheConfig::default(), derive)
    }

    pub fn with_config<F>(store: &'s Store, config: ComputedCacheConfig, derive: F) -> Self
    where
        F: Fn(&Store, &K) -> Derivation<V> + Send + Sync + 's,
    {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        let state = Arc::new(Mutex::new(CacheState::new(capacity)));

        let weak: Weak<Mutex<CacheState<K, V>>> = Arc::downgrade(&state);
        let listener = store.listen(ChangeFilter::all(), move |change| {
            if let Some(state) = weak.upgrade() {
                let invalidated = state.lock().invalidate(&change.diff);
                if invalidated > 0 {
                    debug!(invalidated, epoch = change.epoch.0, "invalidated computed values");
                }
            }
        });

        Self {
            store,
            derive: Box::new(derive),
            state,
            listener,
        }
    }

    /// The value for `key`, derived if it is not memoized.
    pub fn get(&self, key: &K) -> V {
        if let Some(value) = self.state.lock().lookup(key) {
            return value;
        }

        let epoch = self.store.epoch();
        let derivation = (self.derive)(self.store, key);

        let mut state = self.state.lock();
        state.misses += 1;
        // A commit during derivation may have invalidated what was read.
        if self.store.epoch() == epoch {
            state.insert(
                key.clone(),
                Memo {
                    value: derivation.value.clone(),
                    deps: derivation.deps,
                    epoch,
                },
            );
        }
        derivation.value
    }

    pub fn is_cached(&self, key: &K) -> bool {
        self.state.lock().memos.contains(key)
    }

    /// Store epoch at which the memo for `key` was derived.
    pub fn entry_epoch(&self, key: &K) -> Option<Epoch> {
        self.state.lock().memos.peek(key).map(|memo| memo.epoch)
    }

    /// Drop the memo for `key`. Returns false if there was none.
    pub fn invalidate(&self, key: &K) -> bool {
        self.state.lock().forget(key)
    }

    pub fn invalidate_all(&self) {
        self.state.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().memos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            entries: state.memos.len(),
        }
    }
}

impl<K: Hash + Eq, V> Drop for ComputedCache<'_, K, V> {
    fn drop(&mut self) {
        self.store.unlisten(self.listener);
    }
}
