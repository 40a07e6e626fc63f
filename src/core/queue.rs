//! # Concurrent Queue
//!
//! A double-ended queue guarded by a single mutex, with a condition variable so
//! a consumer can block until an item is available.
//!
//! It is the only structure shared between application threads and the I/O
//! thread: each connection keeps one for outbound envelopes, and each role keeps
//! one for inbound messages from all of its connections.
//!
//! Every operation holds the lock for its whole duration, so operations on one
//! queue are atomic with respect to each other. Pushes from a single thread keep
//! their order; pushes from different threads land in lock-acquisition order.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Thread-safe double-ended queue with a blocking `wait`.
pub struct TsQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> TsQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Append to the back and wake one waiter. Returns the length after insertion.
    pub fn push_back(&self, item: T) -> usize {
        let len = {
            let mut items = self.items.lock();
            items.push_back(item);
            items.len()
        };
        self.available.notify_one();
        len
    }

    /// Append to the back unless `limit` items are already queued.
    ///
    /// The length check and the insertion happen under one lock. On success
    /// returns the length after insertion; on refusal hands the item back with
    /// the length that stopped it.
    pub fn push_back_bounded(&self, item: T, limit: usize) -> Result<usize, (T, usize)> {
        let len = {
            let mut items = self.items.lock();
            if items.len() >= limit {
                return Err((item, items.len()));
            }
            items.push_back(item);
            items.len()
        };
        self.available.notify_one();
        Ok(len)
    }

    /// Insert at the front and wake one waiter. Returns the length after insertion.
    pub fn push_front(&self, item: T) -> usize {
        let len = {
            let mut items = self.items.lock();
            items.push_front(item);
            items.len()
        };
        self.available.notify_one();
        len
    }

    /// Remove the front item, `None` when empty.
    pub fn pop_front(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Remove the back item, `None` when empty.
    pub fn pop_back(&self) -> Option<T> {
        self.items.lock().pop_back()
    }

    /// Run `f` against the front item without removing it.
    pub fn with_front<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.items.lock().front().map(f)
    }

    /// Run `f` against the back item without removing it.
    pub fn with_back<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.items.lock().back().map(f)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Drop every item. Waiters are not notified.
    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Block until the queue is non-empty. Spurious wakeups are absorbed.
    pub fn wait(&self) {
        let mut items = self.items.lock();
        while items.is_empty() {
            self.available.wait(&mut items);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns `true` if the queue is non-empty on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        while items.is_empty() {
            if self.available.wait_until(&mut items, deadline).timed_out() {
                break;
            }
        }
        !items.is_empty()
    }

    /// Remove and return everything currently queued, front first.
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }
}

impl<T: Clone> TsQueue<T> {
    /// Clone of the front item.
    pub fn front(&self) -> Option<T> {
        self.items.lock().front().cloned()
    }

    /// Clone of the back item.
    pub fn back(&self) -> Option<T> {
        self.items.lock().back().cloned()
    }
}

impl<T> Default for TsQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for TsQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsQueue").field("len", &self.len()).finish()
    }
}
