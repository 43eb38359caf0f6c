//! Relational store, backed by SQLite via `rusqlite` (the teacher crate's
//! own dependency). spec.md leaves the SQL dialect unspecified beyond the
//! `users`/`messages` table shapes in Sec6, which this schema matches.
//!
//! The original C++ store built SQL by string concatenation and called
//! `mysql_real_escape_string` by hand (`src/chat/ChatHistory.cpp`,
//! `src/chat/AuthService.cpp`) -- the idiomatic, injection-safe Rust
//! equivalent is bound parameters throughout, which is what every query
//! below uses instead of ever formatting user input into SQL text.

use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{AppError, AppResult};
use crate::models::{Message, UserRecord};

/// Bootstraps the schema on a fresh connection, mirroring the teacher's
/// `spawn_db` `CREATE TABLE IF NOT EXISTS` bootstrap.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            phone TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            username TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
        );
        CREATE INDEX IF NOT EXISTS idx_messages_room ON messages(room_id, id DESC);",
    )
}

/// Opens `count` pooled connections against the same database file.
///
/// A literal `:memory:` path is special-cased to a named shared-cache URI:
/// plain `Connection::open(":memory:")` gives every connection its own
/// private, unshared database, which would silently scatter pooled
/// connections' writes and reads across `count` unrelated databases. The
/// shared-cache name is randomized per pool so that two pools opened with
/// `:memory:` in the same process (as happens across parallel tests) don't
/// collide on the same in-memory database.
pub fn open_pool(path: &std::path::Path, count: usize) -> rusqlite::Result<Vec<Connection>> {
    let in_memory = path == std::path::Path::new(":memory:");
    let shared_uri = in_memory.then(|| {
        let token: u64 = rand::thread_rng().gen();
        format!("file:memdb_{:x}?mode=memory&cache=shared", token)
    });

    let mut conns = Vec::with_capacity(count);
    for _ in 0..count {
        let conn = match &shared_uri {
            Some(uri) => Connection::open(uri)?,
            None => Connection::open(path)?,
        };
        init_schema(&conn)?;
        conns.push(conn);
    }
    Ok(conns)
}

pub fn find_user_by_username(conn: &Connection, username: &str) -> AppResult<Option<UserRecord>> {
    conn.query_row(
        "SELECT id, username, phone, password FROM users WHERE username = ?1",
        params![username],
        |row| {
            Ok(UserRecord {
                id: row.get(0)?,
                username: row.get(1)?,
                phone: row.get(2)?,
                password: row.get(3)?,
            })
        },
    )
    .optional()
    .map_err(|e| AppError::DbQuery(e.to_string()))
}

pub fn find_user_by_phone(conn: &Connection, phone: &str) -> AppResult<Option<UserRecord>> {
    conn.query_row(
        "SELECT id, username, phone, password FROM users WHERE phone = ?1",
        params![phone],
        |row| {
            Ok(UserRecord {
                id: row.get(0)?,
                username: row.get(1)?,
                phone: row.get(2)?,
                password: row.get(3)?,
            })
        },
    )
    .optional()
    .map_err(|e| AppError::DbQuery(e.to_string()))
}

pub fn find_user_by_id(conn: &Connection, id: i64) -> AppResult<Option<UserRecord>> {
    conn.query_row(
        "SELECT id, username, phone, password FROM users WHERE id = ?1",
        params![id],
        |row| {
            Ok(UserRecord {
                id: row.get(0)?,
                username: row.get(1)?,
                phone: row.get(2)?,
                password: row.get(3)?,
            })
        },
    )
    .optional()
    .map_err(|e| AppError::DbQuery(e.to_string()))
}

pub fn insert_user(
    conn: &Connection,
    username: &str,
    phone: &str,
    password: &str,
) -> AppResult<i64> {
    conn.execute(
        "INSERT INTO users(username, phone, password) VALUES (?1, ?2, ?3)",
        params![username, phone, password],
    )
    .map_err(|e| AppError::DbQuery(e.to_string()))?;
    Ok(conn.last_insert_rowid())
}

pub fn update_password(conn: &Connection, user_id: i64, new_password: &str) -> AppResult<()> {
    conn.execute(
        "UPDATE users SET password = ?1 WHERE id = ?2",
        params![new_password, user_id],
    )
    .map_err(|e| AppError::DbQuery(e.to_string()))?;
    Ok(())
}

pub fn update_username(conn: &Connection, user_id: i64, new_username: &str) -> AppResult<()> {
    conn.execute(
        "UPDATE users SET username = ?1 WHERE id = ?2",
        params![new_username, user_id],
    )
    .map_err(|e| AppError::DbQuery(e.to_string()))?;
    Ok(())
}

/// `ts` is stored verbatim as `created_at` rather than left to SQLite's
/// `strftime` default, so the caller's clock reading is what every reader
/// (including the broadcast response sent before this commits) agrees on.
pub fn insert_message(
    conn: &Connection,
    room_id: i64,
    user_id: i64,
    username: &str,
    text: &str,
    ts: i64,
) -> AppResult<i64> {
    conn.execute(
        "INSERT INTO messages(room_id, user_id, username, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![room_id, user_id, username, text, ts],
    )
    .map_err(|e| AppError::DbQuery(e.to_string()))?;
    Ok(conn.last_insert_rowid())
}

/// `SELECT ... ORDER BY id DESC LIMIT limit`, returned newest-first -- the
/// original's `loadHistoryFromDB` builds its JSON array in exactly this
/// order and explicitly leaves the reverse-into-chronological-order call
/// commented out, so callers here see the same newest-first array.
pub fn fetch_history(conn: &Connection, room_id: i64, limit: i64) -> AppResult<Vec<Message>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, room_id, user_id, username, content, created_at \
             FROM messages WHERE room_id = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .map_err(|e| AppError::DbQuery(e.to_string()))?;

    let rows = stmt
        .query_map(params![room_id, limit], |row| {
            Ok(Message {
                id: row.get(0)?,
                room_id: row.get(1)?,
                user_id: row.get(2)?,
                username: row.get(3)?,
                text: row.get(4)?,
                ts: row.get(5)?,
            })
        })
        .map_err(|e| AppError::DbQuery(e.to_string()))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| AppError::DbQuery(e.to_string()))?);
    }
    Ok(out)
}
