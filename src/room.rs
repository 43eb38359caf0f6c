//! Bounded per-room member counters.
//!
//! Grounded in `include/chat/RoomManager.h`'s `tryEnterRoom`/`leaveRoom`/
//! `getRoomSize`/`snapshot`, translated from a process-wide singleton into
//! an owned type shared via `Arc` (the idiom the teacher crate already uses
//! for its `Rooms`/`Users` shared state).

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct RoomDirectory {
    counts: Mutex<HashMap<i64, i64>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        RoomDirectory {
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Increments and returns `true` iff doing so keeps `count <= max`.
    pub fn try_join(&self, room_id: i64, max: i64) -> bool {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(room_id).or_insert(0);
        if *count >= max {
            return false;
        }
        *count += 1;
        true
    }

    /// Decrements, never below zero. Missing rooms are a no-op.
    pub fn leave(&self, room_id: i64) {
        let mut counts = self.counts.lock().unwrap();
        if let Some(count) = counts.get_mut(&room_id) {
            if *count > 0 {
                *count -= 1;
            }
        }
    }

    pub fn size(&self, room_id: i64) -> i64 {
        *self.counts.lock().unwrap().get(&room_id).unwrap_or(&0)
    }

    pub fn snapshot(&self) -> HashMap<i64, i64> {
        self.counts.lock().unwrap().clone()
    }
}
