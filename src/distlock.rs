//! Owner-stamped advisory lock over the kv store.
//!
//! Grounded in `include/infra/redis/redis_lock.h`: `tryLock` is an atomic
//! `SET key ownerId NX EX ttl`; `unlock` is a compare-and-delete evaluated
//! atomically via the store's `eval`; the optional watchdog renews the TTL
//! at `ttl/2` and signals loss if another owner has since taken the key.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;

use crate::store::kv::{KvConn, COMPARE_AND_DELETE_SCRIPT};

fn gen_owner_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct DistLock {
    kv: KvConn,
    key: String,
    owner_id: String,
    ttl: Duration,
    locked: bool,
}

impl DistLock {
    pub fn new(kv: KvConn, key: impl Into<String>, ttl: Duration) -> Self {
        DistLock {
            kv,
            key: key.into(),
            owner_id: gen_owner_id(),
            ttl,
            locked: false,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn try_lock(&mut self) -> bool {
        if self.locked {
            return true;
        }
        self.locked = self.kv.set_nx_ex(&self.key, &self.owner_id, self.ttl);
        self.locked
    }

    pub fn unlock(&mut self) {
        if !self.locked {
            return;
        }
        self.kv.eval(
            COMPARE_AND_DELETE_SCRIPT,
            &[self.key.clone()],
            &[self.owner_id.clone()],
        );
        self.locked = false;
    }

    /// Spawns a watchdog task: sleeps `ttl/2`, checks ownership via `get`,
    /// renews the TTL while still owner, and sets `lost` once ownership is
    /// observed to have been taken by someone else (or the key vanished).
    pub fn start_watchdog(&self, stop: Arc<AtomicBool>, lost: Arc<AtomicBool>) {
        let kv = self.kv.clone();
        let key = self.key.clone();
        let owner_id = self.owner_id.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            let sleep_dur = ttl / 2;
            loop {
                tokio::time::sleep(sleep_dur).await;
                if stop.load(Ordering::Acquire) {
                    break;
                }
                match kv.get(&key) {
                    Some(v) if v == owner_id => {
                        kv.expire(&key, ttl);
                    }
                    _ => {
                        lost.store(true, Ordering::Release);
                        break;
                    }
                }
            }
        });
    }
}

impl Drop for DistLock {
    fn drop(&mut self) {
        self.unlock();
    }
}
