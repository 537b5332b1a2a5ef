/// Book registry - one slot per market
///
/// A slot owns the market's book behind its own async mutex. Whoever holds
/// that mutex is the only code allowed to touch the book, so orders for one
/// market are applied one at a time while different markets proceed in
/// parallel. Slots are created lazily on first use and can be evicted when
/// idle; an evicted market is rebuilt from the event log the next time it
/// is needed.

use super::errors::EngineError;
use super::volume::VolumeWindow;
use crate::domain::entities::MarketKey;
use crate::domain::orderbook::PriceTimeOrderBook;
use crate::infrastructure::observability::health::HealthSource;
use crate::shared::metrics::METRICS;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone)]
pub struct MarketState {
    pub market: MarketKey,
    pub book: PriceTimeOrderBook,
    /// Sequence of the last event applied to `book`.
    pub last_sequence: u64,
    /// Largest event timestamp seen, used to keep submission times increasing.
    pub last_timestamp: u64,
    /// Trades applied to `book`, from any instance, over the last 24h.
    pub volume: VolumeWindow,
    /// False until the book has been rebuilt from durable state.
    pub loaded: bool,
    pub suspended: Option<String>,
}

impl MarketState {
    pub fn new(market: MarketKey) -> Self {
        Self {
            market,
            book: PriceTimeOrderBook::new(market),
            last_sequence: 0,
            last_timestamp: 0,
            volume: VolumeWindow::new(),
            loaded: false,
            suspended: None,
        }
    }

    pub fn ensure_active(&self) -> Result<(), EngineError> {
        match &self.suspended {
            Some(reason) => Err(EngineError::MarketSuspended {
                market: self.market,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
pub struct MarketSlot {
    pub market: MarketKey,
    pub state: AsyncMutex<MarketState>,
}

#[derive(Debug, Default)]
pub struct BookRegistry {
    slots: RwLock<HashMap<MarketKey, Arc<MarketSlot>>>,
    suspended: RwLock<HashMap<MarketKey, String>>,
}

impl BookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the market's slot, creating an empty one on first use.
    pub fn slot(&self, market: MarketKey) -> Arc<MarketSlot> {
        if let Some(slot) = self.slots.read().get(&market) {
            return slot.clone();
        }
        self.slots
            .write()
            .entry(market)
            .or_insert_with(|| {
                tracing::debug!(market = %market, "creating market slot");
                Arc::new(MarketSlot {
                    market,
                    state: AsyncMutex::new(MarketState::new(market)),
                })
            })
            .clone()
    }

    pub fn get(&self, market: MarketKey) -> Option<Arc<MarketSlot>> {
        self.slots.read().get(&market).cloned()
    }

    pub fn markets(&self) -> Vec<MarketKey> {
        let mut markets: Vec<_> = self.slots.read().keys().copied().collect();
        markets.sort();
        markets
    }

    /// Drops an idle slot. Returns false if anyone else holds it or it is suspended.
    pub fn evict(&self, market: MarketKey) -> bool {
        if self.is_suspended(market) {
            return false;
        }
        let mut slots = self.slots.write();
        match slots.get(&market) {
            // 只有注册表持有引用时才能安全移除，否则会出现同一市场两把锁
            Some(slot) if Arc::strong_count(slot) == 1 => {
                slots.remove(&market);
                true
            }
            _ => false,
        }
    }

    pub fn mark_suspended(&self, market: MarketKey, reason: &str) {
        let mut suspended = self.suspended.write();
        if suspended.insert(market, reason.to_string()).is_none() {
            METRICS.suspended_markets.inc();
        }
    }

    pub fn clear_suspended(&self, market: MarketKey) {
        if self.suspended.write().remove(&market).is_some() {
            METRICS.suspended_markets.dec();
        }
    }

    pub fn is_suspended(&self, market: MarketKey) -> bool {
        self.suspended.read().contains_key(&market)
    }

    pub fn suspended(&self) -> Vec<(MarketKey, String)> {
        let mut list: Vec<_> = self
            .suspended
            .read()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        list.sort();
        list
    }
}

impl HealthSource for BookRegistry {
    fn active_markets(&self) -> usize {
        self.slots.read().len()
    }

    fn suspended_markets(&self) -> Vec<(MarketKey, String)> {
        self.suspended()
    }
}
