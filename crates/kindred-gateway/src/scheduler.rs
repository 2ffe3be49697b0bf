use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;

/// Keyed one-shot timers. Arming a key again replaces its pending timer, and a
/// timer only fires if it is still the one registered for its key.
pub struct DeferredTasks<K> {
    pending: Arc<Mutex<HashMap<K, Scheduled>>>,
    generation: AtomicU64,
}

struct Scheduled {
    generation: u64,
    handle: AbortHandle,
}

impl<K> Default for DeferredTasks<K> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }
}

impl<K> DeferredTasks<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `action` after `delay` unless the key is re-armed or cancelled first.
    pub fn schedule<F>(&self, key: K, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let pending = self.pending.clone();
        let task_key = key.clone();

        // Held across spawn so the task cannot observe the map before its own entry exists.
        let mut map = self.pending.lock().unwrap_or_else(PoisonError::into_inner);

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let still_armed = {
                let mut map = pending.lock().unwrap_or_else(PoisonError::into_inner);
                match map.get(&task_key) {
                    Some(s) if s.generation == generation => {
                        map.remove(&task_key);
                        true
                    }
                    _ => false,
                }
            };

            if still_armed {
                action.await;
            }
        });

        let previous = map.insert(
            key,
            Scheduled {
                generation,
                handle: task.abort_handle(),
            },
        );
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    /// Disarms the key. Returns true if a timer was pending.
    pub fn cancel(&self, key: &K) -> bool {
        let removed = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        match removed {
            Some(scheduled) => {
                scheduled.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
