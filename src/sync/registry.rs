//! Keyed registry of shared locks.
//!
//! A [`LockRegistry`] maps keys to [`Lock`]s, creating an entry on first use
//! and evicting it as soon as the lock becomes idle (unlocked, nobody
//! queued). Callers that only go through [`LockRegistry::acquire`] and
//! [`LockRegistry::release`] therefore never see stale entries.
//!
//! A lookup through [`LockRegistry::of`] that never acquires leaves an idle
//! entry behind. Every registry operation first drops idle entries that no
//! handle outside the registry refers to, so [`LockRegistry::len`] counts
//! only keys that are locked, awaited, or held through a live handle.
//!
//! Handles returned by [`LockRegistry::of`] should not be kept across idle
//! periods: once the entry has been evicted, the next `of` for the same key
//! creates a fresh lock.
//!
//! Lock order is registry map first, then lock state. The idle hook runs after
//! the lock's state mutex is released.

use super::lock::{Lock, OwnedAcquire};
use crate::error::{Error, Result};
use crate::tracing_compat::trace;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, LazyLock, Weak};

struct RegistryInner<K> {
    locks: Mutex<HashMap<K, Arc<Lock>>>,
}

fn sweep_unused<K>(locks: &mut HashMap<K, Arc<Lock>>) {
    let before = locks.len();
    locks.retain(|_, lock| Arc::strong_count(lock) > 1 || !lock.is_idle());
    if locks.len() != before {
        trace!(swept = before - locks.len(), remaining = locks.len(), "unused locks swept from registry");
    }
}

impl<K: Eq + Hash> RegistryInner<K> {
    fn evict_if_idle(&self, key: &K) {
        let mut locks = self.locks.lock();
        if locks.get(key).is_some_and(|lock| lock.is_idle()) {
            locks.remove(key);
            trace!(remaining = locks.len(), "idle lock evicted from registry");
        }
    }
}

/// One shared [`Lock`] per key, with idle entries removed automatically.
pub struct LockRegistry<K> {
    inner: Arc<RegistryInner<K>>,
}

impl<K> LockRegistry<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn get_or_insert(&self, locks: &mut HashMap<K, Arc<Lock>>, key: K) -> Arc<Lock> {
        sweep_unused(locks);
        let weak: Weak<RegistryInner<K>> = Arc::downgrade(&self.inner);
        let hook_key = key.clone();
        Arc::clone(locks.entry(key).or_insert_with(|| {
            Arc::new(Lock::with_idle_hook(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.evict_if_idle(&hook_key);
                }
            })))
        }))
    }

    /// Returns the lock for `key`, creating it if absent.
    ///
    /// Two calls for the same key return the same lock while it is in use.
    pub fn of(&self, key: K) -> Arc<Lock> {
        let mut locks = self.inner.locks.lock();
        self.get_or_insert(&mut locks, key)
    }

    /// Acquires the lock for `key`.
    ///
    /// Registration happens under the registry mutex, so an entry can not be
    /// evicted between lookup and enqueue.
    pub fn acquire(&self, key: K) -> OwnedAcquire {
        let mut locks = self.inner.locks.lock();
        self.get_or_insert(&mut locks, key).acquire_owned()
    }

    /// Acquires the lock for `key` on behalf of `owner`.
    pub fn acquire_as(&self, key: K, owner: impl Into<String>) -> OwnedAcquire {
        let mut locks = self.inner.locks.lock();
        self.get_or_insert(&mut locks, key).acquire_owned_as(owner)
    }

    /// Releases the lock for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NotLocked`](crate::ErrorKind) if no lock for `key`
    /// is held.
    pub fn release(&self, key: &K) -> Result<()> {
        let lock = {
            let mut locks = self.inner.locks.lock();
            sweep_unused(&mut locks);
            locks.get(key).cloned()
        };
        match lock {
            Some(lock) => lock.release(),
            None => Err(Error::not_locked()),
        }
    }

    /// Returns true if `key` currently has an entry.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        let mut locks = self.inner.locks.lock();
        sweep_unused(&mut locks);
        locks.contains_key(key)
    }

    /// Number of keys currently in use.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut locks = self.inner.locks.lock();
        sweep_unused(&mut locks);
        locks.len()
    }

    /// Returns true if no key is in use.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Default for LockRegistry<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for LockRegistry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockRegistry")
            .field("len", &self.inner.locks.lock().len())
            .finish()
    }
}

static GLOBAL_LOCKS: LazyLock<LockRegistry<String>> = LazyLock::new(LockRegistry::new);

impl Lock {
    /// Returns the process-wide lock for `key`.
    ///
    /// Backed by [`Lock::registry`]; the entry disappears once the lock is
    /// idle.
    pub fn of(key: impl Into<String>) -> Arc<Self> {
        GLOBAL_LOCKS.of(key.into())
    }

    /// The process-wide registry behind [`Lock::of`].
    #[must_use]
    pub fn registry() -> &'static LockRegistry<String> {
        &GLOBAL_LOCKS
    }
}
