/// Market leases - at most one writer per multi-instance market
///
/// A lease is granted by an atomic acquire-if-absent-or-expired on a shared
/// store. It carries a TTL, so a crashed holder blocks the market for at
/// most one TTL, and a fencing token that grows with every grant: a holder
/// whose token no longer matches the store has lost the market and must not
/// write.
///
/// `InMemoryLeaseStore` implements the contract for tests and for several
/// engines sharing one process. A deployment plugs in any store offering a
/// compare-and-set with expiry.

use crate::domain::entities::MarketKey;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub market: MarketKey,
    pub holder: String,
    /// Fencing token, strictly increasing per store.
    pub token: u64,
    pub expires_at: Instant,
}

impl Lease {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease on {market} lost (token {token})")]
    Lost { market: MarketKey, token: u64 },

    #[error("lease store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Grants the lease unless another holder has a valid one.
    ///
    /// `Ok(None)` means the market is held elsewhere.
    async fn try_acquire(&self, market: MarketKey, holder: &str, ttl: Duration) -> Result<Option<Lease>, LeaseError>;

    /// Extends a lease still held under the same token.
    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease, LeaseError>;

    /// Releases the lease if `lease` is still the current one.
    ///
    /// Returns `false` when it had already expired or been taken over.
    async fn release(&self, lease: &Lease) -> Result<bool, LeaseError>;

    /// The currently valid lease, if any.
    async fn holder(&self, market: MarketKey) -> Result<Option<Lease>, LeaseError>;
}

#[derive(Debug, Default)]
struct LeaseTable {
    leases: HashMap<MarketKey, Lease>,
    next_token: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    table: Mutex<LeaseTable>,
    unavailable: AtomicBool,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a store outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), LeaseError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LeaseError::Unavailable("injected outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_acquire(&self, market: MarketKey, holder: &str, ttl: Duration) -> Result<Option<Lease>, LeaseError> {
        self.check_available()?;
        let now = Instant::now();
        let mut table = self.table.lock();

        if let Some(current) = table.leases.get(&market) {
            if !current.is_expired(now) && current.holder != holder {
                return Ok(None);
            }
        }

        table.next_token += 1;
        let lease = Lease {
            market,
            holder: holder.to_string(),
            token: table.next_token,
            expires_at: now + ttl,
        };
        table.leases.insert(market, lease.clone());
        Ok(Some(lease))
    }

    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease, LeaseError> {
        self.check_available()?;
        let now = Instant::now();
        let mut table = self.table.lock();
        match table.leases.get_mut(&lease.market) {
            Some(current) if current.token == lease.token && !current.is_expired(now) => {
                current.expires_at = now + ttl;
                Ok(current.clone())
            }
            _ => Err(LeaseError::Lost {
                market: lease.market,
                token: lease.token,
            }),
        }
    }

    async fn release(&self, lease: &Lease) -> Result<bool, LeaseError> {
        self.check_available()?;
        let mut table = self.table.lock();
        match table.leases.get(&lease.market) {
            Some(current) if current.token == lease.token => {
                table.leases.remove(&lease.market);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn holder(&self, market: MarketKey) -> Result<Option<Lease>, LeaseError> {
        self.check_available()?;
        let now = Instant::now();
        let table = self.table.lock();
        Ok(table.leases.get(&market).filter(|l| !l.is_expired(now)).cloned())
    }
}
