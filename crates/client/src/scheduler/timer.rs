//! Single-slot, replace-on-reschedule timers.
//!
//! Every debounced operation in the scheduler (save debounce, idle timer,
//! AI batch window) is keyed; scheduling for a key that already has a
//! pending timer cancels and replaces it, so at most one timer per key can
//! ever be pending.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct KeyedDebouncer<K> {
    slots: Arc<Mutex<HashMap<K, JoinHandle<()>>>>,
}

impl<K> KeyedDebouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `action` after `delay`, cancelling any pending timer for `key`.
    pub fn schedule<Fut>(&self, key: K, delay: Duration, action: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });

        let mut slots = self.slots.lock().expect("debouncer lock poisoned");
        if let Some(old) = slots.insert(key, handle) {
            old.abort();
        }
    }

    pub fn cancel(&self, key: &K) {
        if let Some(handle) = self.slots.lock().expect("debouncer lock poisoned").remove(key) {
            handle.abort();
        }
    }

    pub fn cancel_all(&self) {
        let mut slots = self.slots.lock().expect("debouncer lock poisoned");
        for (_, handle) in slots.drain() {
            handle.abort();
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.slots
            .lock()
            .expect("debouncer lock poisoned")
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl<K> Default for KeyedDebouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
