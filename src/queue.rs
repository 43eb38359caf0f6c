//! Size-bounded FIFO with blocking put/take and a terminal "stopped" state.
//!
//! Mirrors the original C++ `SafeQueue` (mutex + condition variable) but
//! expressed with `tokio::sync::Notify` so callers can `.await` instead of
//! parking an OS thread -- the worker pool and the server's write path both
//! run on Tokio executors, so this is the idiomatic translation rather than
//! a hand-rolled `Condvar`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

pub struct BoundedQueue<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    stopped: AtomicBool,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        BoundedQueue {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            stopped: AtomicBool::new(false),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Blocks while the queue is full and not stopped. Returns `false`
    /// (without enqueuing) if the queue has been stopped.
    pub async fn put(&self, value: T) -> bool {
        let mut value = Some(value);
        loop {
            let full_notified = self.not_full.notified();
            {
                let mut q = self.queue.lock().unwrap();
                if self.stopped.load(Ordering::Acquire) {
                    return false;
                }
                if q.len() < self.capacity {
                    q.push_back(value.take().unwrap());
                    drop(q);
                    self.not_empty.notify_one();
                    return true;
                }
            }
            full_notified.await;
        }
    }

    /// Blocks while the queue is empty and not stopped. After `stop()`,
    /// drains remaining elements before returning `None`.
    pub async fn take(&self) -> Option<T> {
        loop {
            let empty_notified = self.not_empty.notified();
            {
                let mut q = self.queue.lock().unwrap();
                if let Some(v) = q.pop_front() {
                    drop(q);
                    self.not_full.notify_one();
                    return Some(v);
                }
                if self.stopped.load(Ordering::Acquire) {
                    return None;
                }
            }
            empty_notified.await;
        }
    }

    /// Wakes all waiters; subsequent `take` calls drain remaining elements
    /// then return `None`, and `put` calls return `false` immediately.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Pushes a value without waiting for capacity or checking the stopped
    /// flag. Used only by `ConnectionPool`'s guard `Drop` impl to return a
    /// resource that is guaranteed to still fit (the queue's capacity
    /// equals the pool's fixed resource count, so it can never overflow).
    pub fn push_sync(&self, value: T) {
        let mut q = self.queue.lock().unwrap();
        q.push_back(value);
        drop(q);
        self.not_empty.notify_one();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
