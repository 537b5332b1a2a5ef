/// Order id generation
///
/// Ids must be unique across every instance that may write the same market.
/// The high 16 bits carry a hash of the instance id, the low 48 bits a
/// counter seeded from the clock at startup, so a restarted instance does
/// not reissue ids it handed out before.

use crate::domain::entities::OrderId;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

const COUNTER_BITS: u32 = 48;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

#[derive(Debug)]
pub struct IdGenerator {
    prefix: u64,
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new(instance_id: &str) -> Self {
        Self::with_seed(instance_id, super::timestamp::now_nanos() / 1_000)
    }

    pub fn with_seed(instance_id: &str, seed: u64) -> Self {
        let mut hasher = DefaultHasher::new();
        instance_id.hash(&mut hasher);
        let prefix = (hasher.finish() & 0xFFFF) << COUNTER_BITS;
        Self {
            prefix,
            counter: AtomicU64::new(seed & COUNTER_MASK),
        }
    }

    pub fn next_id(&self) -> OrderId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        self.prefix | (n & COUNTER_MASK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_unique_and_prefixed() {
        let gen = IdGenerator::with_seed("engine-a", 0);
        let ids: HashSet<_> = (0..1_000).map(|_| gen.next_id()).collect();
        assert_eq!(ids.len(), 1_000);
        let prefix = gen.next_id() >> COUNTER_BITS;
        assert!(ids.iter().all(|id| id >> COUNTER_BITS == prefix));
    }

    #[test]
    fn test_instances_do_not_collide() {
        let a = IdGenerator::with_seed("engine-a", 7);
        let b = IdGenerator::with_seed("engine-b", 7);
        assert_ne!(a.next_id(), b.next_id());
    }
}
