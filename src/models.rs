//! Persisted record shapes shared by the store and cache layers.
//!
//! Grounded in spec.md Sec3 and the original schema implied by
//! `src/chat/AuthService.cpp` (`users`) and `src/chat/ChatHistory.cpp`
//! (`messages`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub phone: String,
    /// Password digest (or, for legacy rows, the plaintext password -- see
    /// `auth::authenticate`'s migration path).
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    #[serde(rename = "roomId")]
    pub room_id: i64,
    #[serde(rename = "fromId")]
    pub user_id: i64,
    #[serde(rename = "fromName")]
    pub username: String,
    pub text: String,
    pub ts: i64,
}
