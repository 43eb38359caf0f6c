//! `SessionAuth` & `DirectoryCache`: user lookup by name/phone through a
//! two-tier cache (bounded in-process LRU+TTL, then the kv store, then the
//! relational store), with write-through invalidation on rename/reset.
//!
//! Grounded in `src/chat/AuthService.cpp` for the login/register shape and
//! `include/utils/UserCacheVal.h` for the local-cache layer. Sec9's two
//! corrections are implemented as corrected: `login` always goes through
//! the digest comparator (no cache-hit fast path), and the relational
//! column mapping for `SELECT id, password` is `row[1]`, not `row[2]`.

pub mod lru_cache;
pub mod sms;

use std::time::Duration;

use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::cache::{CacheEngine, FixedWindowLimiter};
use crate::error::{AppError, AppResult};
use crate::models::UserRecord;
use crate::store::kv::KvConn;
use crate::store::rel;
use crate::store::{DbPool, KvPool};

use lru_cache::{CacheTag, LruTtlCache};

const LOCAL_CACHE_CAPACITY: usize = 1024;
const LOCAL_CACHE_TTL: Duration = Duration::from_secs(30);
const NEGATIVE_BASE_TTL: u64 = 600;
const NEGATIVE_JITTER: u64 = 300;
const POSITIVE_BASE_TTL: u64 = 3600;
const POSITIVE_JITTER: u64 = 600;

fn jittered(base: u64, jitter_max: u64) -> Duration {
    let jitter = if jitter_max == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..jitter_max)
    };
    Duration::from_secs(base + jitter)
}

/// Password digest -- a stand-in for the hashing primitive spec.md Sec1
/// explicitly places out of scope. Plain SHA-256 is not a password KDF;
/// production deployments should swap this for one (argon2/bcrypt), which
/// is exactly why spec.md treats the primitive as an external collaborator.
pub fn digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of `digest(password)` against `stored`.
pub fn verify_digest(password: &str, stored: &str) -> bool {
    let computed = digest(password);
    computed.as_bytes().ct_eq(stored.as_bytes()).into()
}

pub struct SessionAuth {
    db_pool: DbPool,
    kv_pool: KvPool,
    cache: CacheEngine,
    name_cache: LruTtlCache<UserRecord>,
    phone_cache: LruTtlCache<UserRecord>,
    global_limiter: FixedWindowLimiter,
}

impl SessionAuth {
    pub fn new(db_pool: DbPool, kv_pool: KvPool) -> Self {
        SessionAuth {
            db_pool,
            kv_pool,
            cache: CacheEngine::new(None),
            name_cache: LruTtlCache::new(LOCAL_CACHE_CAPACITY),
            phone_cache: LruTtlCache::new(LOCAL_CACHE_CAPACITY),
            // Matches the original's g_loginByPhoneLimiter(1000).
            global_limiter: FixedWindowLimiter::new(1000),
        }
    }

    pub async fn load_by_name(&self, username: &str) -> AppResult<Option<UserRecord>> {
        if let Some(tag) = self.name_cache.get(username) {
            return Ok(positive(tag));
        }

        let kv = self.kv_pool.acquire().await.ok_or(AppError::NoKvConnection)?;
        let key = format!("user:name:{}", username);
        let db_pool = self.db_pool.clone();
        let username_owned = username.to_string();

        let result = self
            .cache
            .get_with_pass_through(
                &kv,
                &key,
                jittered(NEGATIVE_BASE_TTL, NEGATIVE_JITTER),
                jittered(POSITIVE_BASE_TTL, POSITIVE_JITTER),
                || async move {
                    let conn = db_pool.acquire().await.ok_or(AppError::NoDbConnection)?;
                    rel::find_user_by_username(&conn, &username_owned)
                },
            )
            .await?;

        self.fill_local(&self.name_cache, username, &result);
        Ok(result)
    }

    pub async fn load_by_phone(&self, phone: &str) -> AppResult<Option<UserRecord>> {
        if let Some(tag) = self.phone_cache.get(phone) {
            return Ok(positive(tag));
        }

        let kv = self.kv_pool.acquire().await.ok_or(AppError::NoKvConnection)?;
        let key = format!("user:phone:{}", phone);
        let db_pool = self.db_pool.clone();
        let phone_owned = phone.to_string();

        let result = self
            .cache
            .get_with_pass_through(
                &kv,
                &key,
                jittered(NEGATIVE_BASE_TTL, NEGATIVE_JITTER),
                jittered(POSITIVE_BASE_TTL, POSITIVE_JITTER),
                || async move {
                    let conn = db_pool.acquire().await.ok_or(AppError::NoDbConnection)?;
                    rel::find_user_by_phone(&conn, &phone_owned)
                },
            )
            .await?;

        self.fill_local(&self.phone_cache, phone, &result);
        Ok(result)
    }

    fn fill_local(&self, cache: &LruTtlCache<UserRecord>, key: &str, result: &Option<UserRecord>) {
        let tag = match result {
            Some(u) => CacheTag::Positive(u.clone()),
            None => CacheTag::Negative,
        };
        cache.put(key, tag, LOCAL_CACHE_TTL);
    }

    /// `authenticate(username, password)`: always verifies via the digest
    /// comparator (never a cache-hit fast path -- see module doc).
    pub async fn authenticate(&self, username: &str, password: &str) -> AppResult<i64> {
        if self.kv_pool.down() && !self.global_limiter.allow() {
            return Err(AppError::RateLimited);
        }

        let user = self
            .load_by_name(username)
            .await?
            .ok_or(AppError::WrongCredentials)?;

        if verify_digest(password, &user.password) {
            return Ok(user.id);
        }

        // Legacy plaintext migration: stored value equals the plaintext.
        if user.password == password {
            let digest_pw = digest(password);
            {
                let conn = self.db_pool.acquire().await.ok_or(AppError::NoDbConnection)?;
                rel::update_password(&conn, user.id, &digest_pw)?;
            }
            self.invalidate_name(&user.username).await?;
            self.invalidate_phone(&user.phone).await?;
            return Ok(user.id);
        }

        Err(AppError::WrongCredentials)
    }

    pub async fn register(
        &self,
        phone: &str,
        username: &str,
        password: &str,
    ) -> AppResult<i64> {
        if self.load_by_name(username).await?.is_some() {
            return Err(AppError::AlreadyRegistered);
        }
        if self.load_by_phone(phone).await?.is_some() {
            return Err(AppError::AlreadyRegistered);
        }

        let digest_pw = digest(password);
        let id = {
            let conn = self.db_pool.acquire().await.ok_or(AppError::NoDbConnection)?;
            rel::insert_user(&conn, username, phone, &digest_pw)?
        };

        let user = UserRecord {
            id,
            username: username.to_string(),
            phone: phone.to_string(),
            password: digest_pw,
        };
        self.warm(username, phone, &user).await?;
        Ok(id)
    }

    /// `rename(userId, newName)`: invalidates old entries *before*
    /// returning success, then re-warms the phone entry with the new name.
    pub async fn rename(&self, user_id: i64, new_name: &str) -> AppResult<(String, String, String)> {
        let old = {
            let conn = self.db_pool.acquire().await.ok_or(AppError::NoDbConnection)?;
            let user = rel::find_user_by_id(&conn, user_id)?.ok_or(AppError::UserNotFound)?;
            if new_name != user.username {
                if rel::find_user_by_username(&conn, new_name)?.is_some() {
                    return Err(AppError::AlreadyRegistered);
                }
                rel::update_username(&conn, user_id, new_name)?;
            }
            user
        };

        self.invalidate_name(&old.username).await?;
        self.invalidate_phone(&old.phone).await?;

        let fresh = UserRecord {
            id: user_id,
            username: new_name.to_string(),
            phone: old.phone.clone(),
            password: old.password.clone(),
        };
        let kv = self.kv_pool.acquire().await.ok_or(AppError::NoKvConnection)?;
        let encoded = serde_json::to_string(&fresh).map_err(|e| AppError::Codec(e.to_string()))?;
        kv.set(&format!("user:phone:{}", old.phone), &encoded, Some(jittered(POSITIVE_BASE_TTL, POSITIVE_JITTER)));
        self.phone_cache.put(old.phone.clone(), CacheTag::Positive(fresh), LOCAL_CACHE_TTL);

        Ok((old.username, new_name.to_string(), old.phone))
    }

    /// `resetPassword(phone, newPassword)`.
    pub async fn reset_password(&self, phone: &str, new_password: &str) -> AppResult<()> {
        let user = self
            .load_by_phone(phone)
            .await?
            .ok_or(AppError::UserNotFound)?;

        let digest_pw = digest(new_password);
        {
            let conn = self.db_pool.acquire().await.ok_or(AppError::NoDbConnection)?;
            rel::update_password(&conn, user.id, &digest_pw)?;
        }

        self.invalidate_name(&user.username).await?;
        self.invalidate_phone(&user.phone).await?;
        self.invalidate_id(user.id).await?;
        Ok(())
    }

    async fn warm(&self, username: &str, phone: &str, user: &UserRecord) -> AppResult<()> {
        let kv = self.kv_pool.acquire().await.ok_or(AppError::NoKvConnection)?;
        let encoded = serde_json::to_string(user).map_err(|e| AppError::Codec(e.to_string()))?;
        let ttl = Some(jittered(POSITIVE_BASE_TTL, POSITIVE_JITTER));
        kv.set(&format!("user:name:{}", username), &encoded, ttl);
        kv.set(&format!("user:phone:{}", phone), &encoded, ttl);
        self.name_cache.put(username, CacheTag::Positive(user.clone()), LOCAL_CACHE_TTL);
        self.phone_cache.put(phone, CacheTag::Positive(user.clone()), LOCAL_CACHE_TTL);
        Ok(())
    }

    async fn kv_conn(&self) -> AppResult<KvConn> {
        self.kv_pool
            .acquire()
            .await
            .map(|guard| (*guard).clone())
            .ok_or(AppError::NoKvConnection)
    }

    async fn invalidate_name(&self, username: &str) -> AppResult<()> {
        let kv = self.kv_conn().await?;
        kv.del(&format!("user:name:{}", username));
        self.name_cache.erase(username);
        Ok(())
    }

    async fn invalidate_phone(&self, phone: &str) -> AppResult<()> {
        let kv = self.kv_conn().await?;
        kv.del(&format!("user:phone:{}", phone));
        self.phone_cache.erase(phone);
        Ok(())
    }

    async fn invalidate_id(&self, user_id: i64) -> AppResult<()> {
        let kv = self.kv_conn().await?;
        kv.del(&format!("user:id:{}", user_id));
        Ok(())
    }
}

fn positive(tag: CacheTag<UserRecord>) -> Option<UserRecord> {
    match tag {
        CacheTag::Positive(u) => Some(u),
        CacheTag::Negative => None,
    }
}
