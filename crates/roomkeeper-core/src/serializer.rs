//! Per-key mutual exclusion.
//!
//! [`KeyedSerializer`] runs at most one operation per key at a time, in call
//! order, while operations on different keys proceed concurrently. Every
//! mutation of membership or session state for a room goes through it.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

type Queue = Arc<tokio::sync::Mutex<()>>;

pub struct KeyedSerializer<K> {
    queues: Mutex<HashMap<K, Queue>>,
}

impl<K> Default for KeyedSerializer<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeyedSerializer<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Queue>> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` once every earlier call for `key` has finished.
    ///
    /// The turn is released when `f` completes, fails, panics, or the
    /// returned future is dropped, so a key can never stay locked.
    pub async fn wait_for_turn<F, Fut, T>(&self, key: K, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let turn = Turn::enter(self, key);
        let _held = turn.queue.lock().await;
        f().await
    }

    /// Number of keys with an operation running or waiting.
    pub fn active_keys(&self) -> usize {
        self.lock().len()
    }

    pub fn is_busy(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }
}

/// A caller's place in a key's queue. Dropping the last one removes the key.
struct Turn<'a, K>
where
    K: Eq + Hash + Clone,
{
    owner: &'a KeyedSerializer<K>,
    key: K,
    queue: Queue,
}

impl<'a, K> Turn<'a, K>
where
    K: Eq + Hash + Clone,
{
    fn enter(owner: &'a KeyedSerializer<K>, key: K) -> Self {
        let queue = Arc::clone(owner.lock().entry(key.clone()).or_default());
        Self { owner, key, queue }
    }
}

impl<K> Drop for Turn<'_, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        let mut queues = self.owner.lock();
        let idle = queues
            .get(&self.key)
            .is_some_and(|q| Arc::ptr_eq(q, &self.queue) && Arc::strong_count(q) == 2);
        if idle {
            queues.remove(&self.key);
        }
    }
}
