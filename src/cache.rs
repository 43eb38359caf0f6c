//! Multi-tier caching engine: policies layered over a `KvConn`.
//!
//! Grounded directly in `include/infra/redis/cache_client.h`: `set` (method
//! 1, physical TTL -- not separately exposed here, callers use `KvConn::set`
//! directly), `getWithPassThrough` (method 3, negative caching against
//! key-nonexistence storms), `getWithLogicalExpire` (method 4, logical
//! expiry + async rebuild against hot-key expiry storms), plus the
//! single-flight barrier and fallback admission limiter spec.md Sec4.6
//! layers on top.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::AppResult;
use crate::queue::BoundedQueue;
use crate::store::kv::KvConn;

/// Reserved value that can never collide with a legitimately encoded value
/// (every real payload is a JSON array or object; this is neither).
pub const NULL_MARK: &str = "\u{0}_NULL_\u{0}";

pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Serialize, Deserialize)]
struct LogicalEntry<T> {
    data: T,
    #[serde(rename = "expireAt")]
    expire_at: i64,
}

fn now_epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

/// Fixed one-second-window request counter. Grounded in
/// `utils::SimpleQpsLimiter` in `UserCacheVal.h`.
pub struct FixedWindowLimiter {
    limit: i64,
    last_sec: AtomicI64,
    count: AtomicI64,
}

impl FixedWindowLimiter {
    pub fn new(limit_per_sec: i64) -> Self {
        FixedWindowLimiter {
            limit: limit_per_sec,
            last_sec: AtomicI64::new(0),
            count: AtomicI64::new(0),
        }
    }

    pub fn allow(&self) -> bool {
        let sec = now_epoch_secs();
        let last = self.last_sec.load(Ordering::Acquire);
        if sec != last {
            // Racing resets collapse harmlessly: worst case a window's
            // count briefly undercounts, never overcounts past the limit.
            self.last_sec.store(sec, Ordering::Release);
            self.count.store(0, Ordering::Release);
        }
        let prev = self.count.fetch_add(1, Ordering::AcqRel);
        prev < self.limit
    }
}

/// Policies over a `KvConn`, plus an optional submitter used to bound
/// background rebuild tasks by the same `WorkerPool` that runs request
/// handlers (falls back to a detached `tokio::spawn` otherwise, matching
/// `CacheClient::submitBackground`'s `std::thread` fallback).
pub struct CacheEngine {
    submitter: Option<Arc<BoundedQueue<Task>>>,
    barrier: AsyncMutex<()>,
    fallback_limiter: FixedWindowLimiter,
}

impl CacheEngine {
    pub fn new(submitter: Option<Arc<BoundedQueue<Task>>>) -> Self {
        CacheEngine {
            submitter,
            barrier: AsyncMutex::new(()),
            // Matches ChatHistory's MAX_FALLBACK_QPS; reused by any caller
            // gating on "the cache tier is declared down".
            fallback_limiter: FixedWindowLimiter::new(50),
        }
    }

    /// True if a caller may proceed to the fallback (relational-store-only)
    /// path this second; false if the fallback budget is exhausted.
    pub fn check_fallback_admission(&self) -> bool {
        self.fallback_limiter.allow()
    }

    async fn submit_background(&self, task: Task) {
        match &self.submitter {
            Some(queue) => {
                queue.put(task).await;
            }
            None => {
                tokio::spawn(task);
            }
        }
    }

    /// Pass-through read with negative caching (method 3).
    pub async fn get_with_pass_through<T, F, Fut>(
        &self,
        kv: &KvConn,
        key: &str,
        null_ttl: Duration,
        normal_ttl: Duration,
        loader: F,
    ) -> AppResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<Option<T>>>,
    {
        match kv.get(key) {
            Some(raw) if raw == NULL_MARK => return Ok(None),
            Some(raw) => {
                if let Ok(value) = serde_json::from_str::<T>(&raw) {
                    return Ok(Some(value));
                }
            }
            None => {}
        }

        match loader().await? {
            None => {
                kv.set(key, NULL_MARK, Some(null_ttl));
                Ok(None)
            }
            Some(value) => {
                if let Ok(encoded) = serde_json::to_string(&value) {
                    kv.set(key, &encoded, Some(normal_ttl));
                }
                Ok(Some(value))
            }
        }
    }

    /// Logical-expiry read with async rebuild (method 4).
    pub async fn get_with_logical_expire<T, F, Fut>(
        &self,
        kv: &KvConn,
        key: &str,
        logical_ttl: Duration,
        loader: F,
    ) -> AppResult<Option<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<Option<T>>> + Send + 'static,
    {
        let now = now_epoch_secs();
        let decoded: Option<LogicalEntry<T>> =
            kv.get(key).and_then(|raw| serde_json::from_str(&raw).ok());

        let entry = match decoded {
            Some(entry) => entry,
            None => {
                // Miss or undecodable: synchronous load and fill.
                return match loader().await? {
                    None => Ok(None),
                    Some(data) => {
                        let fresh = LogicalEntry {
                            data: data.clone(),
                            expire_at: now + logical_ttl.as_secs() as i64,
                        };
                        if let Ok(encoded) = serde_json::to_string(&fresh) {
                            kv.set(key, &encoded, None);
                        }
                        Ok(Some(data))
                    }
                };
            }
        };

        if now < entry.expire_at {
            return Ok(Some(entry.data));
        }

        // Stale: serve immediately, rebuild off to the side. This engine
        // does not itself dedupe concurrent rebuilds for the same key --
        // callers that need that use `with_single_flight` instead.
        let stale = entry.data.clone();
        let kv_bg = kv.clone();
        let key_bg = key.to_string();
        let ttl_secs = logical_ttl.as_secs() as i64;
        let rebuild: Task = Box::pin(async move {
            match loader().await {
                Ok(Some(data)) => {
                    let fresh = LogicalEntry {
                        data,
                        expire_at: now_epoch_secs() + ttl_secs,
                    };
                    if let Ok(encoded) = serde_json::to_string(&fresh) {
                        kv_bg.set(&key_bg, &encoded, None);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key = %key_bg, error = %e, "logical-expire rebuild failed");
                }
            }
        });
        self.submit_background(rebuild).await;

        Ok(Some(stale))
    }

    /// Single-flight barrier: `check()` is re-run after acquiring the lock
    /// ("double-check") so only the first miss under contention pays for
    /// `load()`.
    pub async fn with_single_flight<T, Fcheck, Fload, FutLoad>(
        &self,
        mut check: Fcheck,
        load: Fload,
    ) -> AppResult<T>
    where
        Fcheck: FnMut() -> Option<T>,
        Fload: FnOnce() -> FutLoad,
        FutLoad: Future<Output = AppResult<T>>,
    {
        if let Some(v) = check() {
            return Ok(v);
        }
        let _guard = self.barrier.lock().await;
        if let Some(v) = check() {
            return Ok(v);
        }
        load().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::KvStore;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn pass_through_negative_caches_absent_loader_result() {
        let store = KvStore::new();
        let kv = store.connections(1).remove(0);
        let engine = CacheEngine::new(None);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let result: AppResult<Option<String>> = engine
                .get_with_pass_through(
                    &kv,
                    "missing",
                    Duration::from_secs(5),
                    Duration::from_secs(5),
                    || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    },
                )
                .await;
            assert_eq!(result.unwrap(), None);
        }

        // loader only ran once; the rest hit the null marker
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pass_through_caches_present_values() {
        let store = KvStore::new();
        let kv = store.connections(1).remove(0);
        let engine = CacheEngine::new(None);

        let result = engine
            .get_with_pass_through(
                &kv,
                "user:name:alice",
                Duration::from_secs(5),
                Duration::from_secs(5),
                || async { Ok(Some(42i64)) },
            )
            .await
            .unwrap();
        assert_eq!(result, Some(42));
        assert_eq!(kv.get("user:name:alice"), Some("42".to_string()));
    }

    #[tokio::test]
    async fn logical_expire_returns_stale_then_rebuilds() {
        let store = KvStore::new();
        let kv = store.connections(1).remove(0);
        let engine = CacheEngine::new(None);

        let stale = LogicalEntry {
            data: vec!["old".to_string()],
            expire_at: now_epoch_secs() - 1,
        };
        kv.set("room:history:1:10", &serde_json::to_string(&stale).unwrap(), None);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_loader = calls.clone();
        let result = engine
            .get_with_logical_expire(
                &kv,
                "room:history:1:10",
                Duration::from_secs(60),
                move || {
                    let calls = calls_for_loader.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(Some(vec!["fresh".to_string()]))
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(result, Some(vec!["old".to_string()]));

        // background rebuild runs on a detached task; give it a moment.
        for _ in 0..20 {
            if calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let raw = kv.get("room:history:1:10").unwrap();
        let refreshed: LogicalEntry<Vec<String>> = serde_json::from_str(&raw).unwrap();
        assert_eq!(refreshed.data, vec!["fresh".to_string()]);
        assert!(refreshed.expire_at >= now_epoch_secs());
    }

    #[test]
    fn fixed_window_limiter_caps_within_one_second() {
        let limiter = FixedWindowLimiter::new(3);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }
}
