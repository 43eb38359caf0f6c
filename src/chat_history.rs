//! `ChatPersistence`: message persistence and cached history reads.
//!
//! Grounded directly in `src/chat/ChatHistory.cpp`: `SaveMessage` and
//! `GetHistoryWithCache`, including the `room:history:<roomId>:<limit>` key
//! shape, the 60-90s TTL jitter window, the single-flight double-checked
//! lock around the cache-miss path, and the 50/s fallback QPS cap once the
//! kv store is declared down.

use std::time::Duration;

use rand::Rng;

use crate::cache::CacheEngine;
use crate::error::{AppError, AppResult};
use crate::models::Message;
use crate::store::rel;
use crate::store::{DbPool, KvPool};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;
const HISTORY_TTL_BASE: u64 = 60;
const HISTORY_TTL_JITTER: u64 = 30;
// Matches CacheEngine's own fallback limiter (ChatHistory.cpp's
// MAX_FALLBACK_QPS); tests reference it directly rather than duplicating it.
const MAX_FALLBACK_QPS: i64 = 50;

fn clamp_limit(limit: i64) -> i64 {
    if limit <= 0 {
        DEFAULT_LIMIT
    } else {
        limit.min(MAX_LIMIT)
    }
}

pub struct ChatPersistence {
    db_pool: DbPool,
    kv_pool: KvPool,
    cache: CacheEngine,
}

impl ChatPersistence {
    pub fn new(db_pool: DbPool, kv_pool: KvPool) -> Self {
        ChatPersistence {
            db_pool,
            kv_pool,
            cache: CacheEngine::new(None),
        }
    }

    /// `save(roomId, userId, username, text)`. Failures are logged, never
    /// propagated -- the broadcast has already been sent by the time this
    /// runs (spec.md Sec4.9). Returns the persisted row (including its
    /// assigned id and the `ts` actually committed) so callers can echo it
    /// back in the broadcast response without a second round trip.
    pub async fn save(&self, room_id: i64, user_id: i64, username: &str, text: &str) -> Option<Message> {
        let conn = match self.db_pool.acquire().await {
            Some(conn) => conn,
            None => {
                tracing::error!(room_id, user_id, "ChatPersistence::save: no db connection");
                return None;
            }
        };
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        match rel::insert_message(&conn, room_id, user_id, username, text, ts) {
            Ok(id) => Some(Message {
                id,
                room_id,
                user_id,
                username: username.to_string(),
                text: text.to_string(),
                ts,
            }),
            Err(e) => {
                tracing::error!(room_id, user_id, error = %e, "ChatPersistence::save: insert failed");
                None
            }
        }
    }

    /// `getHistory(roomId, limit)`.
    pub async fn get_history(&self, room_id: i64, limit: i64) -> AppResult<Vec<Message>> {
        let room_id = if room_id <= 0 { 1 } else { room_id };
        let limit = clamp_limit(limit);
        let key = format!("room:history:{}:{}", room_id, limit);

        if !self.kv_pool.down() {
            let kv = self.kv_pool.acquire().await.ok_or(AppError::NoKvConnection)?;
            if let Some(raw) = kv.get(&key) {
                if let Ok(history) = serde_json::from_str::<Vec<Message>>(&raw) {
                    return Ok(history);
                }
            }

            let db_pool = self.db_pool.clone();
            let kv_check = (*kv).clone();
            let key_check = key.clone();
            let kv_load = (*kv).clone();
            let key_load = key.clone();
            return self
                .cache
                .with_single_flight(
                    move || kv_check.get(&key_check).and_then(|raw| serde_json::from_str(&raw).ok()),
                    move || async move {
                        let conn = db_pool.acquire().await.ok_or(AppError::NoDbConnection)?;
                        let history = rel::fetch_history(&conn, room_id, limit)?;
                        let ttl = Duration::from_secs(
                            HISTORY_TTL_BASE + rand::thread_rng().gen_range(0..=HISTORY_TTL_JITTER),
                        );
                        if let Ok(encoded) = serde_json::to_string(&history) {
                            kv_load.set(&key_load, &encoded, Some(ttl));
                        }
                        Ok(history)
                    },
                )
                .await;
        }

        // kv store down: fail fast once the fallback budget is exhausted.
        if !self.cache.check_fallback_admission() {
            return Err(AppError::KvDown);
        }
        let conn = self.db_pool.acquire().await.ok_or(AppError::NoDbConnection)?;
        rel::fetch_history(&conn, room_id, limit)
    }

    pub async fn invalidate(&self, room_id: i64) -> AppResult<()> {
        let kv = self.kv_pool.acquire().await.ok_or(AppError::NoKvConnection)?;
        for limit in [DEFAULT_LIMIT, MAX_LIMIT, 10, 20, 50, 100] {
            kv.del(&format!("room:history:{}:{}", room_id, limit));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{build_db_pool, kv::KvStore};

    fn persistence() -> (ChatPersistence, DbPool, KvPool, KvStore) {
        let db_pool = build_db_pool(std::path::Path::new(":memory:"), 2).unwrap();
        let kv_store = KvStore::new();
        let kv_pool = crate::store::ConnectionPool::new(kv_store.connections(2));
        let persistence = ChatPersistence::new(db_pool.clone(), kv_pool.clone());
        (persistence, db_pool, kv_pool, kv_store)
    }

    #[tokio::test]
    async fn save_then_get_history_round_trips() {
        let (persistence, _db, _kv, _store) = persistence();
        persistence.save(1, 7, "alice", "hello").await;
        let history = persistence.get_history(1, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "hello");
        assert_eq!(history[0].username, "alice");
    }

    #[tokio::test]
    async fn limit_is_clamped_to_1_200() {
        assert_eq!(clamp_limit(0), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(-5), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(10_000), MAX_LIMIT);
        assert_eq!(clamp_limit(5), 5);
    }

    #[tokio::test]
    async fn stale_room_id_defaults_to_room_1() {
        let (persistence, _db, _kv, _store) = persistence();
        persistence.save(1, 7, "alice", "hi").await;
        let history = persistence.get_history(0, 10).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn invalidate_clears_common_limit_keys() {
        let (persistence, _db, kv_pool, _store) = persistence();
        persistence.save(2, 1, "bob", "first").await;
        let _ = persistence.get_history(2, 10).await.unwrap();
        persistence.invalidate(2).await.unwrap();

        let kv = kv_pool.acquire().await.unwrap();
        assert_eq!(kv.get("room:history:2:10"), None);
    }

    #[tokio::test]
    async fn kv_down_falls_back_to_db_until_qps_budget_exhausted() {
        let (persistence, db_pool, kv_pool, _store) = persistence();
        persistence.save(3, 1, "carol", "msg").await;
        kv_pool.shutdown();
        assert!(kv_pool.down());

        let mut ok = 0;
        let mut rejected = 0;
        for _ in 0..(MAX_FALLBACK_QPS + 10) {
            match persistence.get_history(3, 10).await {
                Ok(_) => ok += 1,
                Err(AppError::KvDown) => rejected += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(ok, MAX_FALLBACK_QPS as usize);
        assert_eq!(rejected, 10);
        let _ = db_pool; // keep pool alive for the duration of the test
    }
}
