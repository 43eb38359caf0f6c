//! Fd-keyed map of live connections guarded by a single mutex.
//!
//! Grounded in the original's registry of owning smart pointers keyed by fd
//! (spec.md §9 "Registry ownership"): the registry owns every `Connection`
//! exclusively; callers (worker tasks, `postWrite`) receive only the fd and
//! re-resolve it here under the lock on each use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::conn::Connection;
use crate::room::RoomDirectory;

pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
    next_fd: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry {
            connections: Mutex::new(HashMap::new()),
            next_fd: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh descriptor and registers a new Connection under it.
    pub fn insert_new(&self) -> Arc<Connection> {
        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(Connection::new(fd));
        self.connections.lock().unwrap().insert(fd, conn.clone());
        conn
    }

    pub fn get(&self, fd: u64) -> Option<Arc<Connection>> {
        self.connections.lock().unwrap().get(&fd).cloned()
    }

    /// Idempotent: removing an already-closed fd is a no-op, matching
    /// spec.md §4.3's "removing an already-closed fd must be idempotent".
    /// If the connection held room membership, decrements it there.
    pub fn remove(&self, fd: u64, rooms: &RoomDirectory) {
        let removed = self.connections.lock().unwrap().remove(&fd);
        if let Some(conn) = removed {
            let room_id = conn.room_on_close.load(std::sync::atomic::Ordering::Acquire);
            if room_id != 0 {
                rooms.leave(room_id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// All currently-registered connections, used to close every socket on
    /// graceful shutdown (spec.md §5 "Cancellation").
    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().unwrap().values().cloned().collect()
    }

    /// Every connection currently in `room_id`, excluding `exclude_fd`.
    /// Used by `send_msg`'s broadcast fan-out (spec.md §6's `broadcast`
    /// response flag).
    pub fn in_room(&self, room_id: i64, exclude_fd: u64) -> Vec<Arc<Connection>> {
        self.connections
            .lock()
            .unwrap()
            .values()
            .filter(|conn| conn.fd != exclude_fd && conn.room_id() == room_id)
            .cloned()
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let registry = ConnectionRegistry::new();
        let conn = registry.insert_new();
        let fd = conn.fd;
        assert!(registry.get(fd).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_is_idempotent_and_decrements_room() {
        let registry = ConnectionRegistry::new();
        let rooms = RoomDirectory::new();
        let conn = registry.insert_new();
        let fd = conn.fd;
        rooms.try_join(5, 10);
        conn.set_room(5);

        registry.remove(fd, &rooms);
        assert_eq!(rooms.size(5), 0);
        assert!(registry.get(fd).is_none());

        // second remove of the same fd: no panic, no double-decrement
        registry.remove(fd, &rooms);
        assert_eq!(rooms.size(5), 0);
    }

    #[test]
    fn distinct_inserts_get_distinct_fds() {
        let registry = ConnectionRegistry::new();
        let a = registry.insert_new();
        let b = registry.insert_new();
        assert_ne!(a.fd, b.fd);
    }
}
