//! Accept loop and per-connection read/write tasks.
//!
//! Grounded in spec.md §4.5: `Server::start` binds and listens, `onAccept`
//! loops `accept`, `onConnRead`/`onConnWrite` drain sockets and maintain
//! buffers, `postWrite` implements the append→want-write→notify ordering
//! spec.md §5 calls load-bearing, and `closeConn` is idempotent and leaves
//! any room the connection held.
//!
//! The teacher crate's server spoke WebSocket frames over `warp`; this one
//! speaks newline-delimited JSON directly over `TcpStream`, so the
//! accept/read/write plumbing is rebuilt here rather than reused, in the
//! same position in the module tree the teacher's `server.rs` occupied.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::cache::Task;
use crate::conn::Connection;
use crate::context::AppContext;
use crate::handlers;
use crate::reactor::Reactor;
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownListener;
use crate::worker::WorkerPool;

const READ_CHUNK: usize = 4096;

pub struct Server {
    registry: Arc<ConnectionRegistry>,
    worker_pool: Arc<WorkerPool>,
    ctx: Arc<AppContext>,
}

impl Server {
    pub fn new(ctx: Arc<AppContext>, worker_pool: Arc<WorkerPool>) -> Self {
        Server {
            registry: Arc::new(ConnectionRegistry::new()),
            worker_pool,
            ctx,
        }
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Runs the accept loop on the given `Reactor`'s dedicated I/O thread
    /// until `shutdown` fires, then closes the listener and every
    /// connection still in the registry.
    pub async fn run(&self, reactor: &Reactor, port: u16, mut shutdown: ShutdownListener) -> anyhow::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        tracing::info!(port, "listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            socket.set_nodelay(true).ok();
                            self.accept(reactor, socket, peer);
                        }
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("shutdown signal received, closing listener");
                    break;
                }
            }
        }

        self.close_all();
        Ok(())
    }

    fn accept(&self, reactor: &Reactor, socket: TcpStream, peer: std::net::SocketAddr) {
        let conn = self.registry.insert_new();
        tracing::info!(fd = conn.fd, %peer, "connection accepted");

        let (read_half, write_half) = socket.into_split();
        let registry = self.registry.clone();
        let worker_pool = self.worker_pool.clone();
        let ctx = self.ctx.clone();
        let conn_for_write = conn.clone();

        reactor.spawn(write_loop(conn_for_write, write_half));
        reactor.spawn(read_loop(conn, read_half, registry, worker_pool, ctx));
    }

    /// `closeConn` applied to every live connection: arms short-close and
    /// wakes each write task, which shuts the socket down and returns; the
    /// matching read task then observes the close and removes itself from
    /// the registry.
    fn close_all(&self) {
        for conn in self.registry.all() {
            conn.short_close.store(true, std::sync::atomic::Ordering::Release);
            conn.write_ready.notify_one();
        }
    }
}

async fn read_loop(
    conn: Arc<Connection>,
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    registry: Arc<ConnectionRegistry>,
    worker_pool: Arc<WorkerPool>,
    ctx: Arc<AppContext>,
) {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) => break, // peer closed
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(fd = conn.fd, error = %e, "read error");
                break;
            }
        };

        let lines: Vec<String> = {
            let mut inbuf = conn.inbuf.lock().unwrap();
            inbuf.extend_from_slice(&chunk[..n]);
            let mut lines = Vec::new();
            loop {
                let newline_pos = inbuf.iter().position(|&b| b == b'\n');
                match newline_pos {
                    Some(pos) => {
                        let mut line_bytes: Vec<u8> = inbuf.drain(..=pos).collect();
                        line_bytes.pop(); // drop '\n'
                        if line_bytes.last() == Some(&b'\r') {
                            line_bytes.pop();
                        }
                        lines.push(String::from_utf8_lossy(&line_bytes).into_owned());
                    }
                    None => break,
                }
            }
            lines
        };

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let conn = conn.clone();
            let registry = registry.clone();
            let ctx = ctx.clone();
            let fd = conn.fd;
            let task: Task = Box::pin(async move {
                // Re-resolve the connection; it may have been closed
                // while this task waited in the queue.
                if registry.get(fd).is_none() {
                    return;
                }
                let response = handlers::dispatch(&ctx, &conn, &line).await;
                post_write(&conn, response.to_line().into_bytes());
                if response.is_close() {
                    conn.short_close.store(true, std::sync::atomic::Ordering::Release);
                    conn.write_ready.notify_one();
                }
                if response.is_broadcast() {
                    broadcast_to_room(&registry, &conn, &response.to_line());
                }
            });
            if !worker_pool.submit(task).await {
                tracing::warn!(fd, "worker pool stopped, dropping line");
            }
        }
    }

    registry.remove(conn.fd, &ctx.rooms);
    tracing::info!(fd = conn.fd, "connection closed");
}

fn broadcast_to_room(registry: &ConnectionRegistry, sender: &Connection, line: &str) {
    let room_id = sender.room_id();
    if room_id == 0 {
        return;
    }
    for peer in registry.in_room(room_id, sender.fd) {
        post_write(&peer, line.as_bytes().to_vec());
    }
}

async fn write_loop(conn: Arc<Connection>, mut write_half: tokio::net::tcp::OwnedWriteHalf) {
    loop {
        conn.write_ready.notified().await;
        loop {
            let pending = {
                let mut outbuf = conn.outbuf.lock().unwrap();
                if outbuf.is_empty() {
                    None
                } else {
                    Some(std::mem::take(&mut *outbuf))
                }
            };
            match pending {
                Some(bytes) => {
                    if write_half.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
                None => break,
            }
        }
        conn.want_write.store(false, std::sync::atomic::Ordering::Release);
        if conn.short_close.load(std::sync::atomic::Ordering::Acquire) {
            let _ = write_half.shutdown().await;
            return;
        }
    }
}

/// `postWrite`: append → set want-write → notify, in that order (spec.md
/// §5's load-bearing ordering — the notify-based analog of "modify Reactor
/// interest then wakeup", since there is no separate interest set to
/// update once the write task is already parked on `write_ready`).
fn post_write(conn: &Connection, data: Vec<u8>) {
    conn.outbuf.lock().unwrap().extend_from_slice(&data);
    conn.want_write.store(true, std::sync::atomic::Ordering::Release);
    conn.write_ready.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_write_appends_and_arms_want_write() {
        let conn = Connection::new(1);
        post_write(&conn, b"hello\n".to_vec());
        assert!(conn.want_write.load(std::sync::atomic::Ordering::Acquire));
        assert_eq!(&*conn.outbuf.lock().unwrap(), b"hello\n");
    }

    #[test]
    fn post_write_twice_concatenates_in_order() {
        let conn = Connection::new(1);
        post_write(&conn, b"a".to_vec());
        post_write(&conn, b"b".to_vec());
        assert_eq!(&*conn.outbuf.lock().unwrap(), b"ab");
    }
}
