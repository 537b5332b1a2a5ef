/// Shared book snapshots for multi-instance markets
///
/// The lease holder publishes a `BookSnapshot` after every mutation. The
/// store keeps the newest one per market by sequence and ignores anything
/// older, so a slow publisher can never roll a market back. Readers on any
/// instance serve market data from here, and a new writer restores from it
/// before catching up on the event log.

use crate::domain::entities::MarketKey;
use crate::domain::orderbook::BookSnapshot;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotStoreError {
    #[error("snapshot store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SharedBookStore: Send + Sync {
    /// Stores `snapshot` if it is newer than the current one.
    ///
    /// Returns whether it was stored.
    async fn put(&self, snapshot: BookSnapshot) -> Result<bool, SnapshotStoreError>;

    async fn get(&self, market: MarketKey) -> Result<Option<BookSnapshot>, SnapshotStoreError>;
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<MarketKey, BookSnapshot>>,
    unavailable: AtomicBool,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), SnapshotStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SnapshotStoreError::Unavailable("injected outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedBookStore for InMemorySnapshotStore {
    async fn put(&self, snapshot: BookSnapshot) -> Result<bool, SnapshotStoreError> {
        self.check_available()?;
        let mut snapshots = self.snapshots.write();
        match snapshots.get(&snapshot.market) {
            Some(current) if current.sequence >= snapshot.sequence => Ok(false),
            _ => {
                snapshots.insert(snapshot.market, snapshot);
                Ok(true)
            }
        }
    }

    async fn get(&self, market: MarketKey) -> Result<Option<BookSnapshot>, SnapshotStoreError> {
        self.check_available()?;
        Ok(self.snapshots.read().get(&market).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::orderbook::PriceTimeOrderBook;

    const MARKET: MarketKey = MarketKey::new(8, 1);

    fn snapshot(sequence: u64) -> BookSnapshot {
        BookSnapshot::capture(&PriceTimeOrderBook::new(MARKET), sequence, 10, 0, sequence)
    }

    #[tokio::test]
    async fn test_only_newer_snapshots_stored() {
        let store = InMemorySnapshotStore::new();
        assert!(store.put(snapshot(5)).await.unwrap());
        assert!(!store.put(snapshot(3)).await.unwrap());
        assert!(!store.put(snapshot(5)).await.unwrap());
        assert!(store.put(snapshot(6)).await.unwrap());
        assert_eq!(store.get(MARKET).await.unwrap().map(|s| s.sequence), Some(6));
    }

    #[tokio::test]
    async fn test_missing_market() {
        let store = InMemorySnapshotStore::new();
        assert!(store.get(MARKET).await.unwrap().is_none());
    }
}
