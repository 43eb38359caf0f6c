//! Per-socket connection state: buffers, write-wanted/short-close flags,
//! and session substate.
//!
//! Grounded in spec.md §3's Connection model and the original's
//! `Connection` class (`include/net/connection.h`), translated onto Tokio:
//! `inbuf` is only ever touched by the connection's read task, `outbuf` and
//! the two flags are shared with worker tasks via `postWrite` and so live
//! behind the registry lock (see `registry.rs`).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

/// Logical substate of a Connection (spec.md §3 Session).
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub authed: bool,
    pub user_id: i64,
    pub username: String,
    pub room_id: i64,
}

pub struct Connection {
    pub fd: u64,
    pub inbuf: Mutex<Vec<u8>>,
    pub outbuf: Mutex<Vec<u8>>,
    pub want_write: AtomicBool,
    pub short_close: AtomicBool,
    pub session: Mutex<Session>,
    /// Analog of the Reactor's per-fd write-readiness interest: the
    /// dedicated write task for this connection parks here until
    /// `postWrite` notifies it that `outbuf` has new bytes.
    pub(crate) write_ready: Notify,
    /// Set by the room a connection is removed from so `closeConn` can
    /// call `RoomDirectory::leave` exactly once.
    pub(crate) room_on_close: AtomicI64,
}

impl Connection {
    pub fn new(fd: u64) -> Self {
        Connection {
            fd,
            inbuf: Mutex::new(Vec::new()),
            outbuf: Mutex::new(Vec::new()),
            want_write: AtomicBool::new(false),
            short_close: AtomicBool::new(false),
            session: Mutex::new(Session::default()),
            write_ready: Notify::new(),
            room_on_close: AtomicI64::new(0),
        }
    }

    pub fn is_authed(&self) -> bool {
        self.session.lock().unwrap().authed
    }

    pub fn room_id(&self) -> i64 {
        self.session.lock().unwrap().room_id
    }

    pub fn set_room(&self, room_id: i64) {
        self.session.lock().unwrap().room_id = room_id;
        self.room_on_close.store(room_id, Ordering::Release);
    }

    pub fn clear_room(&self) {
        self.session.lock().unwrap().room_id = 0;
        self.room_on_close.store(0, Ordering::Release);
    }

    pub fn set_authed(&self, user_id: i64, username: String) {
        let mut session = self.session.lock().unwrap();
        session.authed = true;
        session.user_id = user_id;
        session.username = username;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_connection_is_unauthed_and_roomless() {
        let conn = Connection::new(1);
        assert!(!conn.is_authed());
        assert_eq!(conn.room_id(), 0);
    }

    #[test]
    fn set_authed_then_set_room_updates_session() {
        let conn = Connection::new(1);
        conn.set_authed(42, "alice".to_string());
        conn.set_room(7);
        let session = conn.session.lock().unwrap();
        assert!(session.authed);
        assert_eq!(session.user_id, 42);
        assert_eq!(session.username, "alice");
        assert_eq!(session.room_id, 7);
    }
}
