//! # Thread-Safe Queue
//!
//! A `VecDeque` behind a single mutex. Every operation takes the lock for its
//! own duration only; there are no blocking or waiting variants, so consumers
//! poll `is_empty()` (or just `pop_front()`, which returns `None` when empty).
//!
//! ## Usage
//! ```rust
//! use framewire::utils::queue::ThreadSafeQueue;
//!
//! let queue = ThreadSafeQueue::new();
//! queue.push_back(1);
//! queue.push_back(2);
//! queue.push_front(0);
//! assert_eq!(queue.count(), 3);
//! assert_eq!(queue.pop_front(), Some(0));
//! assert_eq!(queue.pop_back(), Some(2));
//! ```
//!
//! A poisoned lock is recovered rather than propagated; the deque itself is
//! never left half-modified by a panicking caller because no user code runs
//! under the lock.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Mutex-guarded double-ended queue
#[derive(Debug)]
pub struct ThreadSafeQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> ThreadSafeQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_front(&self, item: T) {
        self.lock().push_front(item);
    }

    pub fn push_back(&self, item: T) {
        self.lock().push_back(item);
    }

    pub fn pop_front(&self) -> Option<T> {
        self.lock().pop_front()
    }

    pub fn pop_back(&self) -> Option<T> {
        self.lock().pop_back()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Remove up to `max` items from the front in one lock acquisition
    pub fn drain_front(&self, max: usize) -> Vec<T> {
        let mut queue = self.lock();
        let take = max.min(queue.len());
        queue.drain(..take).collect()
    }
}

impl<T: Clone> ThreadSafeQueue<T> {
    /// Copy of the first element
    pub fn front(&self) -> Option<T> {
        self.lock().front().cloned()
    }

    /// Copy of the last element
    pub fn back(&self) -> Option<T> {
        self.lock().back().cloned()
    }
}

impl<T> Default for ThreadSafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
