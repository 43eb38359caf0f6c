pub mod kv;
pub mod rel;

use std::path::Path;

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::pool::ConnectionPool;

pub type DbPool = ConnectionPool<Connection>;
pub type KvPool = ConnectionPool<kv::KvConn>;

/// Builds the relational-store pool from config, matching `DBPool::init`'s
/// eager-connect-N-resources behavior in the original source.
pub fn build_db_pool(path: &Path, size: usize) -> rusqlite::Result<DbPool> {
    let conns = rel::open_pool(path, size)?;
    Ok(ConnectionPool::new(conns))
}

/// Builds the kv-store pool, all handles sharing one in-process store.
pub fn build_kv_pool(config: &AppConfig) -> (KvPool, kv::KvStore) {
    let store = kv::KvStore::new();
    let conns = store.connections(config.kv_pool_size);
    (ConnectionPool::new(conns), store)
}
