use std::path::PathBuf;

use structopt::StructOpt;

/// Process configuration, parsed from CLI flags (via `structopt`, the
/// teacher crate's existing dependency) with sensible defaults for every
/// field spec.md Sec6 "Process config" names.
#[derive(Debug, StructOpt, Clone)]
#[structopt(name = "bi_chat", about = "Line-oriented JSON chat server")]
pub struct Opt {
    /// TCP port to listen on.
    #[structopt(long, default_value = "3030")]
    pub port: u16,

    /// Use edge-triggered readiness semantics for connection I/O.
    #[structopt(long)]
    pub edge_triggered: bool,

    /// Number of worker-pool threads executing request handlers.
    #[structopt(long, default_value = "4")]
    pub workers: usize,

    /// Depth of the bounded queue feeding the worker pool.
    #[structopt(long, default_value = "1024")]
    pub queue_capacity: usize,

    /// Number of pooled relational-store connections.
    #[structopt(long, default_value = "8")]
    pub db_pool_size: usize,

    /// Number of pooled kv-store connections.
    #[structopt(long, default_value = "8")]
    pub kv_pool_size: usize,

    /// Path to the SQLite database file backing the relational store.
    #[structopt(long, default_value = "./main.db", parse(from_os_str))]
    pub db_path: PathBuf,

    /// Maximum members per chat room.
    #[structopt(long, default_value = "100")]
    pub max_room_size: i64,

    /// This server instance's worker id, used in composite id generation
    /// (0..=1023, 10 bits).
    #[structopt(long, default_value = "1")]
    pub worker_id: i64,
}

/// Runtime configuration derived from `Opt`. Kept separate from the
/// `structopt` struct so library code does not depend on the CLI crate.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub edge_triggered: bool,
    pub workers: usize,
    pub queue_capacity: usize,
    pub db_pool_size: usize,
    pub kv_pool_size: usize,
    pub db_path: PathBuf,
    pub max_room_size: i64,
    pub worker_id: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            port: 3030,
            edge_triggered: true,
            workers: 4,
            queue_capacity: 1024,
            db_pool_size: 8,
            kv_pool_size: 8,
            db_path: PathBuf::from("./main.db"),
            max_room_size: 100,
            worker_id: 1,
        }
    }
}

impl From<Opt> for AppConfig {
    fn from(o: Opt) -> Self {
        AppConfig {
            port: o.port,
            edge_triggered: o.edge_triggered,
            workers: o.workers,
            queue_capacity: o.queue_capacity,
            db_pool_size: o.db_pool_size,
            kv_pool_size: o.kv_pool_size,
            db_path: o.db_path,
            max_room_size: o.max_room_size,
            worker_id: o.worker_id,
        }
    }
}
