//! A size-limited LRU (least recently used) cache with synchronized loading.
//!
use std::{
    collections::{BTreeMap, HashMap},
    fmt::Debug,
    hash::Hash,
    sync::Arc,
};

use futures::{
    channel::oneshot::{channel, Sender},
    future::BoxFuture,
};
use parking_lot::Mutex;

use crate::errors::{Error, Result};

/// An LRU cache.
///
/// Values implement `Cacheable`, which self reports size, roughly the number of bytes the object
/// takes up in memory. When adding an object pushes the total size over the limit, the least
/// recently used objects are evicted until the total is back under the limit. An object bigger
/// than the limit is handed back to the caller but not kept.
///
/// On a cache miss, `get` calls a loader function. If several tasks request the same missing
/// object at once, only the first one runs its loader. The others wait for that load to finish.
///
/// Keys are content ids, so values never change under a key and nothing needs invalidating.
///
pub struct Cache<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    entries: Mutex<Entries<K, V>>,

    /// Loads in progress
    loaders: Mutex<HashMap<K, Arc<Loader<V>>>>,
}

/// A trait for objects that can be cached
///
pub trait Cacheable {
    /// Approximate size of the object in memory, in bytes
    fn size(&self) -> u64;
}

struct Entries<K, V> {
    limit: u64,
    size: u64,

    /// Incremented on every use. Larger is more recent.
    tick: u64,
    map: HashMap<K, Entry<V>>,

    /// Keys by last use
    order: BTreeMap<u64, K>,
}

struct Entry<V> {
    object: Arc<V>,
    size: u64,
    tick: u64,
}

/// Shares the outcome of one load with every task waiting on it
struct Loader<V> {
    outcome: Mutex<Option<Option<Arc<V>>>>,
    waiters: Mutex<Vec<Sender<Option<Arc<V>>>>>,
}

/// Makes sure waiters are released even if the loading task is dropped before finishing
struct LoadGuard<'a, K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    cache: &'a Cache<K, V>,
    key: K,
    loader: Arc<Loader<V>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    pub fn new(limit: u64) -> Self {
        let entries = Mutex::new(Entries {
            limit,
            size: 0,
            tick: 0,
            map: HashMap::new(),
            order: BTreeMap::new(),
        });

        Self {
            entries,
            loaders: Mutex::new(HashMap::new()),
        }
    }

    /// Get an object by key, calling `load` on a cache miss.
    ///
    /// If the same object is already being loaded by another task, waits for that load instead.
    /// Waiters on a load that fails get `Error::Load`; the loading task gets the original error.
    ///
    pub async fn get<L>(&self, key: &K, load: L) -> Result<Arc<V>>
    where
        L: FnOnce(K) -> BoxFuture<'static, Result<V>>,
    {
        if let Some(object) = self.entries.lock().touch(key) {
            return Ok(object);
        }

        let (first, loader) = {
            let mut loaders = self.loaders.lock();
            match loaders.get(key) {
                Some(loader) => (false, Arc::clone(loader)),
                None => {
                    // Could have been loaded between the lookup above and taking the lock
                    if let Some(object) = self.entries.lock().touch(key) {
                        return Ok(object);
                    }
                    let loader = Arc::new(Loader::new());
                    loaders.insert(*key, Arc::clone(&loader));

                    (true, loader)
                }
            }
        };

        if !first {
            return loader.wait().await;
        }

        let guard = LoadGuard {
            cache: self,
            key: *key,
            loader,
        };
        let object = load(*key).await.map(Arc::new);
        if let Ok(object) = &object {
            self.entries.lock().insert(*key, object);
            guard.loader.finish(Some(Arc::clone(object)));
        }

        object
    }

    /// Number of objects currently cached
    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Entries<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up an object and mark it as most recently used
    fn touch(&mut self, key: &K) -> Option<Arc<V>> {
        let tick = self.next_tick();
        let entry = self.map.get_mut(key)?;
        self.order.remove(&entry.tick);
        entry.tick = tick;
        self.order.insert(tick, *key);

        Some(Arc::clone(&entry.object))
    }

    fn insert(&mut self, key: K, object: &Arc<V>) {
        let tick = self.next_tick();
        let size = object.size();
        let entry = Entry {
            object: Arc::clone(object),
            size,
            tick,
        };
        if let Some(old) = self.map.insert(key, entry) {
            self.order.remove(&old.tick);
            self.size -= old.size;
        }
        self.order.insert(tick, key);
        self.size += size;

        while self.size > self.limit {
            let oldest = match self.order.keys().next() {
                Some(tick) => *tick,
                None => break,
            };
            if let Some(key) = self.order.remove(&oldest) {
                if let Some(evicted) = self.map.remove(&key) {
                    self.size -= evicted.size;
                }
            }
        }
    }
}

impl<V> Loader<V> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Record the outcome of the load and wake up waiters. `None` means the load failed.
    fn finish(&self, object: Option<Arc<V>>) {
        let mut outcome = self.outcome.lock();
        if outcome.is_some() {
            return;
        }
        *outcome = Some(object.clone());
        drop(outcome);

        for waiter in self.waiters.lock().drain(..) {
            // A waiter that has gone away doesn't need to know
            let _ = waiter.send(object.clone());
        }
    }

    async fn wait(&self) -> Result<Arc<V>> {
        let receive = {
            let mut waiters = self.waiters.lock();
            if let Some(outcome) = &*self.outcome.lock() {
                return outcome.clone().ok_or(Error::Load);
            }
            let (send, receive) = channel();
            waiters.push(send);

            receive
        };

        receive.await.ok().flatten().ok_or(Error::Load)
    }
}

impl<K, V> Drop for LoadGuard<'_, K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    fn drop(&mut self) {
        // No-op if the load already succeeded
        self.loader.finish(None);
        self.cache.loaders.lock().remove(&self.key);
    }
}
