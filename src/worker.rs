//! Fixed-size pool of worker threads executing request-handling tasks off
//! the Reactor thread.
//!
//! Grounded in the original `ThreadPool::RunPool` (`include/infra/thread_pool.h`):
//! N OS threads each loop `take` on a shared task queue until `stop`. Here
//! each thread runs its own single-threaded Tokio runtime so handler code
//! can `.await` store/cache calls; a panicking task is caught so one bad
//! request cannot take down a worker thread (spec.md §4.4, §7).

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use futures::FutureExt;
use tokio::runtime::Builder;

use crate::cache::Task;
use crate::queue::BoundedQueue;

pub struct WorkerPool {
    queue: Arc<BoundedQueue<Task>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let queue = Arc::new(BoundedQueue::new(queue_capacity));
        let handles = (0..workers.max(1))
            .map(|id| spawn_worker(id, queue.clone()))
            .collect();
        WorkerPool {
            queue,
            handles: Mutex::new(handles),
        }
    }

    pub fn queue(&self) -> Arc<BoundedQueue<Task>> {
        self.queue.clone()
    }

    /// Non-blocking from the caller's perspective unless the queue is
    /// full, in which case the caller backpressures (spec.md §4.4).
    pub async fn submit(&self, task: Task) -> bool {
        self.queue.put(task).await
    }

    /// Stops accepting new work; in-flight tasks are allowed to complete
    /// (spec.md §5 "Cancellation"). Joins every worker thread.
    pub fn shutdown(&self) {
        self.queue.stop();
        for handle in self.handles.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}

fn spawn_worker(id: usize, queue: Arc<BoundedQueue<Task>>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("bi_chat-worker-{}", id))
        .spawn(move || {
            let rt = Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("worker runtime build");
            rt.block_on(async move {
                loop {
                    match queue.take().await {
                        Some(task) => {
                            if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                                tracing::error!(worker = id, "worker task panicked");
                            }
                        }
                        None => break,
                    }
                }
            });
        })
        .expect("spawn worker thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn submitted_tasks_run() {
        let pool = WorkerPool::new(2, 16);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            let task: Task = Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            assert!(pool.submit(task).await);
        }
        // give the worker threads a moment to drain
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) == 10 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        pool.shutdown();
    }

    #[tokio::test]
    async fn a_panicking_task_does_not_stop_the_worker() {
        let pool = WorkerPool::new(1, 16);
        let panicking: Task = Box::pin(async move {
            panic!("boom");
        });
        assert!(pool.submit(panicking).await);

        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        let after: Task = Box::pin(async move {
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        assert!(pool.submit(after).await);

        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        pool.shutdown();
    }
}
