/// Per-key token buckets for rate-limited warnings
///
/// Contention errors (full queues, busy markets) can fire thousands of times
/// a second under load. `WarnLimiter::check` lets the caller log the first
/// few and then roughly `refill_per_sec` per key, and reports how many were
/// suppressed since the last emitted line.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    last_update: Instant,
    suppressed: u64,
}

pub struct WarnLimiter<K> {
    capacity: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<K, Bucket>>,
}

impl<K: Eq + Hash> WarnLimiter<K> {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `Some(suppressed)` when a line may be logged for `key`.
    pub fn check(&self, key: K) -> Option<u64> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_update: now,
            suppressed: 0,
        });

        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = f64::min(self.capacity, bucket.tokens + elapsed * self.refill_per_sec);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Some(std::mem::take(&mut bucket.suppressed))
        } else {
            bucket.suppressed += 1;
            None
        }
    }
}

impl<K: Eq + Hash> Default for WarnLimiter<K> {
    fn default() -> Self {
        Self::new(5, 1.0)
    }
}
