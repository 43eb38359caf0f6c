//! Composite 63-bit identifiers: `(seconds-since-epoch << 32) | (workerId
//! << 22) | (sequence & 0x3FFFFF)`.
//!
//! Grounded in `include/infra/id/id_generator.h`: 31 bits of time, 10 bits
//! of worker id, 22 bits of per-day sequence obtained from an `INCRBY` on
//! the kv store under `id:<bizKey>:<YYYYMMDD>`.

use chrono::{Local, TimeZone};

use crate::store::kv::KvConn;

const WORKER_BITS: u32 = 10;
const SEQ_BITS: u32 = 22;
const WORKER_MASK: i64 = (1 << WORKER_BITS) - 1;
const SEQ_MASK: i64 = (1 << SEQ_BITS) - 1;

pub struct IdIssuer {
    worker_id: i64,
    epoch_secs: i64,
}

impl IdIssuer {
    /// `epoch` defaults to 2023-01-01 00:00 local time, per spec.md Sec3.
    pub fn new(worker_id: i64) -> Self {
        let epoch = Local
            .with_ymd_and_hms(2023, 1, 1, 0, 0, 0)
            .single()
            .expect("2023-01-01 local midnight is unambiguous");
        IdIssuer {
            worker_id: worker_id & WORKER_MASK,
            epoch_secs: epoch.timestamp(),
        }
    }

    pub fn next(&self, kv: &KvConn, biz_key: &str) -> i64 {
        let now = Local::now();
        let time_part = now.timestamp() - self.epoch_secs;
        let date_str = now.format("%Y%m%d").to_string();
        let seq_key = format!("id:{}:{}", biz_key, date_str);
        let seq = kv.incr_by(&seq_key, 1);

        (time_part << (WORKER_BITS + SEQ_BITS))
            | (self.worker_id << SEQ_BITS)
            | (seq & SEQ_MASK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::KvStore;

    #[test]
    fn ids_within_one_worker_are_strictly_increasing() {
        let store = KvStore::new();
        let kv = store.connections(1).remove(0);
        let issuer = IdIssuer::new(3);

        let mut prev = issuer.next(&kv, "msg");
        for _ in 0..50 {
            let id = issuer.next(&kv, "msg");
            assert!(id > prev, "{} should be > {}", id, prev);
            prev = id;
        }
    }

    #[test]
    fn ids_across_workers_differ_in_worker_bits() {
        let store = KvStore::new();
        let kv = store.connections(1).remove(0);
        let a = IdIssuer::new(1);
        let b = IdIssuer::new(2);

        let id_a = a.next(&kv, "msg");
        let id_b = b.next(&kv, "msg");
        let worker_a = (id_a >> SEQ_BITS) & WORKER_MASK;
        let worker_b = (id_b >> SEQ_BITS) & WORKER_MASK;
        assert_ne!(worker_a, worker_b);
        assert_eq!(worker_a, 1);
        assert_eq!(worker_b, 2);
    }
}
