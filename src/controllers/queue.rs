//! Deduplicating, delay-aware work queue of reconcile requests
//!
//! A key is pending at most once; adding it again keeps whichever due time
//! is earlier. A key handed out by [`WorkQueue::next`] stays active until
//! [`WorkQueue::done`], and is not handed out again in the meantime even if
//! it was re-added, so at most one reconcile per key is ever in flight.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};

use crate::store::ObjectKey;

#[derive(Default)]
struct QueueState {
    pending: HashMap<ObjectKey, Instant>,
    active: HashSet<ObjectKey>,
    shutting_down: bool,
}

/// Work queue shared by the dispatcher and its workers
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Request a reconcile of `key` as soon as possible
    pub fn add(&self, key: ObjectKey) {
        self.add_after(key, Duration::ZERO);
    }

    /// Request a reconcile of `key` once `delay` has elapsed
    pub fn add_after(&self, key: ObjectKey, delay: Duration) {
        let due = Instant::now() + delay;
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            state
                .pending
                .entry(key)
                .and_modify(|at| {
                    if due < *at {
                        *at = due;
                    }
                })
                .or_insert(due);
        }
        self.notify.notify_waiters();
    }

    /// Wait for the next due key that is not in flight.
    ///
    /// Returns `None` once the queue is shut down. Cancel safe: a key is only
    /// marked active in the same poll that returns it.
    pub async fn next(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }

                let now = Instant::now();
                let mut ready: Option<(ObjectKey, Instant)> = None;
                let mut earliest: Option<Instant> = None;
                for (key, &due) in &state.pending {
                    if state.active.contains(key) {
                        continue;
                    }
                    if due <= now {
                        if ready.as_ref().map_or(true, |(_, at)| due < *at) {
                            ready = Some((key.clone(), due));
                        }
                    } else if earliest.map_or(true, |at| due < at) {
                        earliest = Some(due);
                    }
                }

                if let Some((key, _)) = ready {
                    state.pending.remove(&key);
                    state.active.insert(key.clone());
                    return Some(key);
                }
                earliest
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Mark `key` as no longer in flight
    pub fn done(&self, key: &ObjectKey) {
        self.lock().active.remove(key);
        self.notify.notify_waiters();
    }

    /// Number of pending keys
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is currently in flight
    pub fn is_active(&self, key: &ObjectKey) -> bool {
        self.lock().active.contains(key)
    }

    /// Stop handing out work and drop everything pending
    pub fn shut_down(&self) {
        {
            let mut state = self.lock();
            state.shutting_down = true;
            state.pending.clear();
        }
        self.notify.notify_waiters();
    }
}
