//! Generic pool of eagerly-connected resources, yielding scoped handles
//! whose `Drop` automatically returns the resource.
//!
//! Grounded in the original `DBPool`/`RedisPool` singletons (both backed by
//! a `SafeQueue<ConnPtr>`), generalized here to one `ConnectionPool<T>` type
//! reused for both the relational-store pool and the kv-store pool.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::queue::BoundedQueue;

pub struct ConnectionPool<T> {
    queue: Arc<BoundedQueue<T>>,
    down: Arc<AtomicBool>,
}

/// Hand-written rather than `#[derive(Clone)]`: the derive macro would add
/// a `T: Clone` bound even though both fields are `Arc`s and never clone a
/// `T` directly -- `rusqlite::Connection` (this pool's most common resource
/// type) isn't `Clone`, so the derived bound would make `DbPool: Clone`
/// unsatisfiable and break every `db_pool.clone()` call site.
impl<T> Clone for ConnectionPool<T> {
    fn clone(&self) -> Self {
        ConnectionPool {
            queue: self.queue.clone(),
            down: self.down.clone(),
        }
    }
}

impl<T> ConnectionPool<T> {
    /// Builds a pool from an already-connected set of resources. An empty
    /// `resources` is treated as an initialization failure: the pool starts
    /// in the `down` state and every `acquire()` returns `None` immediately.
    pub fn new(resources: Vec<T>) -> Self {
        let down = resources.is_empty();
        let capacity = resources.len().max(1);
        let queue = Arc::new(BoundedQueue::new(capacity));
        for r in resources {
            // Always fits under capacity, so this never blocks.
            queue.push_sync(r);
        }
        if down {
            // No resources will ever materialize; stop the queue so
            // `acquire` reports failure instead of blocking forever.
            queue.stop();
        }
        ConnectionPool {
            queue,
            down: Arc::new(AtomicBool::new(down)),
        }
    }

    /// Blocks until a resource is available. Returns `None` once the pool
    /// has been shut down via `shutdown()`, or immediately if the pool
    /// started empty (an initialization failure).
    pub async fn acquire(&self) -> Option<PoolGuard<T>> {
        match self.queue.take().await {
            Some(resource) => {
                self.down.store(false, Ordering::Release);
                Some(PoolGuard {
                    resource: Some(resource),
                    queue: self.queue.clone(),
                })
            }
            None => {
                self.down.store(true, Ordering::Release);
                None
            }
        }
    }

    pub fn down(&self) -> bool {
        self.down.load(Ordering::Acquire)
    }

    /// Stops accepting new acquisitions; in-flight `acquire` calls drain the
    /// remaining resources, after which they observe `None`.
    pub fn shutdown(&self) {
        self.down.store(true, Ordering::Release);
        self.queue.stop();
    }

    /// Brings a shut-down pool back up by handing it freshly (re)connected
    /// resources -- the recovery half of spec.md Sec8 scenario 6 ("bring KV
    /// store back up; all subsequent calls succeed"). `BoundedQueue::stop()`
    /// is one-way, but `push_sync` doesn't consult the stopped flag, and
    /// `take()` checks for a ready item before it checks `stopped` -- so
    /// pushing resources back in is enough to resume service without needing
    /// the queue itself to un-stop. A no-op if `resources` is empty.
    pub fn restore(&self, resources: Vec<T>) {
        if resources.is_empty() {
            return;
        }
        for r in resources {
            self.queue.push_sync(r);
        }
        self.down.store(false, Ordering::Release);
    }
}

pub struct PoolGuard<T> {
    resource: Option<T>,
    queue: Arc<BoundedQueue<T>>,
}

impl<T> Deref for PoolGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.resource.as_ref().expect("resource taken")
    }
}

impl<T> DerefMut for PoolGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.resource.as_mut().expect("resource taken")
    }
}

impl<T> Drop for PoolGuard<T> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.queue.push_sync(resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_pool_starts_down() {
        let pool: ConnectionPool<i32> = ConnectionPool::new(vec![]);
        assert!(pool.down());
        assert!(pool.acquire().await.is_none());
    }

    #[tokio::test]
    async fn acquire_release_preserves_initial_count() {
        let pool = ConnectionPool::new(vec![1, 2, 3]);
        assert!(!pool.down());

        for _ in 0..10 {
            let g1 = pool.acquire().await.unwrap();
            let g2 = pool.acquire().await.unwrap();
            drop(g1);
            drop(g2);
        }

        let mut held = Vec::new();
        for _ in 0..3 {
            held.push(pool.acquire().await.unwrap());
        }
        // pool is fully drained now; a 4th acquire would block, so just
        // check we got exactly the original 3 distinct values back.
        let mut values: Vec<i32> = held.iter().map(|g| **g).collect();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn shutdown_drains_then_returns_none() {
        let pool = ConnectionPool::new(vec![1]);
        let g = pool.acquire().await.unwrap();
        pool.shutdown();
        drop(g); // returns the resource into the now-stopped queue

        // the already-returned resource is still handed out once more...
        assert_eq!(pool.acquire().await.map(|g| *g), Some(1));
        // ...then the pool reports exhausted.
        assert_eq!(pool.acquire().await.map(|g| *g), None);
    }

    #[tokio::test]
    async fn restore_after_shutdown_resumes_service() {
        let pool = ConnectionPool::new(vec![1]);
        let g = pool.acquire().await.unwrap();
        pool.shutdown();
        drop(g);
        assert_eq!(pool.acquire().await.map(|g| *g), Some(1));
        assert_eq!(pool.acquire().await.map(|g| *g), None);
        assert!(pool.down());

        pool.restore(vec![2, 3]);
        assert!(!pool.down());
        let mut values: Vec<i32> = Vec::new();
        values.push(*pool.acquire().await.unwrap());
        values.push(*pool.acquire().await.unwrap());
        values.sort_unstable();
        assert_eq!(values, vec![2, 3]);
    }

    #[tokio::test]
    async fn restore_with_no_resources_is_a_no_op() {
        let pool: ConnectionPool<i32> = ConnectionPool::new(vec![]);
        assert!(pool.down());
        pool.restore(vec![]);
        assert!(pool.down());
        assert!(pool.acquire().await.is_none());
    }
}
