//! Keyed debounce timers.
//!
//! Scheduling under a key that already has a pending action aborts that
//! action and starts the delay again, so a burst of calls collapses into one
//! invocation fired `delay` after the last call.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use tokio::task::JoinHandle;

pub struct Debouncer<K> {
    pending: HashMap<K, JoinHandle<()>>,
}

impl<K: Eq + Hash> Default for Debouncer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> Debouncer<K> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Run `action` once `delay` has passed without another call for `key`.
    pub fn schedule<F>(&mut self, key: K, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pending.retain(|_, handle| !handle.is_finished());
        if let Some(previous) = self.pending.remove(&key) {
            previous.abort();
        }
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });
        self.pending.insert(key, handle);
    }

    /// Cancel the pending action for `key`. Returns whether one was waiting.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.pending.remove(key) {
            Some(handle) => {
                let waiting = !handle.is_finished();
                handle.abort();
                waiting
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}
