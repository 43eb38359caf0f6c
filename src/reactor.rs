//! The I/O-driving thread.
//!
//! Grounded in spec.md §4.3: a single event-loop thread, non-blocking
//! sockets drained on every readiness notification, and a cross-thread
//! wakeup mechanism. The teacher crate (and this one) run on Tokio, whose
//! multi-threaded I/O driver *is* the idiomatic Rust realization of a
//! hand-rolled epoll loop: non-blocking sockets, edge-triggered readiness,
//! and cross-thread wakeup of pending reads/writes are the runtime's job,
//! not application code's (see SPEC_FULL.md §4.3 for the full argument).
//!
//! `Reactor` here is a thin handle around one dedicated single-threaded
//! Tokio runtime, used only for socket accept/read/write tasks, so that
//! blocking store I/O performed by the WorkerPool's threads (`worker.rs`)
//! never shares a thread with connection I/O -- matching spec.md §5's "the
//! Reactor thread MUST NOT perform store I/O".
//!
//! The hand-rolled epoll loop this is grounded in exposes its own external
//! `stop()`/`wakeup()`: clear a running flag, then post a self-pipe byte to
//! interrupt the `epoll_wait` the loop is parked in. `run()` here has no
//! equivalent internal wait to interrupt -- it is a single `block_on` of the
//! caller-supplied future, and that future already owns its own shutdown
//! signal (`ShutdownListener`, see `server.rs`) and returns on its own once
//! every connection is closed. An external stop/wakeup pair would have
//! nothing to act on but a flag nobody reads, so it was dropped rather than
//! kept as decoration -- see DESIGN.md.

use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;

pub struct Reactor {
    runtime: Runtime,
}

impl Reactor {
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Reactor { runtime })
    }

    /// Runs `main` to completion on this reactor's dedicated thread,
    /// blocking the caller until it finishes (mirrors the original's
    /// `loop()` being the reactor thread's entire body).
    pub fn run<F>(&self, main: F)
    where
        F: std::future::Future<Output = ()>,
    {
        self.runtime.block_on(main);
    }

    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(fut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn run_executes_spawned_work_to_completion() {
        let reactor = Reactor::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        reactor.run(async move {
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn spawned_tasks_run_to_completion_alongside_main() {
        let reactor = Reactor::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        reactor.run(async move {
            let handle = tokio::spawn(async move {
                counter2.fetch_add(1, Ordering::SeqCst);
            });
            handle.await.unwrap();
        });
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
