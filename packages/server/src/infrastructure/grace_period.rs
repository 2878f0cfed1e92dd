//! Debounced disconnect handling.
//!
//! A transport disconnect arms a timer per key; re-authenticating before it
//! fires cancels it. Scheduling the same key again replaces the previous timer.
//! The utility knows nothing about rooms: it only runs the callback it is
//! handed.

use std::{collections::HashMap, future::Future, hash::Hash, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

struct Pending {
    id: u64,
    task: JoinHandle<()>,
}

struct Timers<K> {
    next_id: u64,
    pending: HashMap<K, Pending>,
}

pub struct DisconnectGracePeriod<K> {
    delay: Duration,
    timers: Arc<Mutex<Timers<K>>>,
}

impl<K> DisconnectGracePeriod<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timers: Arc::new(Mutex::new(Timers {
                next_id: 0,
                pending: HashMap::new(),
            })),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `callback` after the delay unless `key` is cancelled or
    /// rescheduled first.
    pub fn schedule<F, Fut>(&self, key: K, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut timers = self.timers.lock();
        timers.next_id += 1;
        let id = timers.next_id;

        let delay = self.delay;
        let shared = Arc::clone(&self.timers);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut timers = shared.lock();
                // Lost the race against cancel/reschedule.
                if timers.pending.get(&task_key).map(|p| p.id) != Some(id) {
                    return;
                }
                timers.pending.remove(&task_key);
            }
            callback().await;
        });

        if let Some(previous) = timers.pending.insert(key, Pending { id, task }) {
            previous.task.abort();
        }
    }

    /// Cancel the timer of `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match self.timers.lock().pending.remove(key) {
            Some(pending) => {
                pending.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.timers.lock().pending.contains_key(key)
    }
}
