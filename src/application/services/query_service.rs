/// Query Service - read path
///
/// Serves market data, depth and recent trades without touching the write
/// path or any market mutex. Single-instance markets read from the local
/// `ReadModel`, which the notifier updates as events are emitted.
/// Multi-instance markets read the shared `BookSnapshot` published by
/// whichever instance currently holds the lease, so every instance sees
/// the same book. Recent trades always come from the local read model.

use crate::application::dto::MarketDataSnapshot;
use crate::application::errors::EngineError;
use crate::application::read_model::ReadModel;
use crate::domain::entities::{MarketKey, Trade};
use crate::domain::orderbook::BookDepth;
use crate::infrastructure::snapshot_store::SharedBookStore;
use std::collections::HashSet;
use std::sync::Arc;

pub struct QueryService {
    read_model: Arc<ReadModel>,
    snapshots: Arc<dyn SharedBookStore>,
    multi_instance: Arc<HashSet<MarketKey>>,
    default_depth: usize,
}

impl QueryService {
    pub fn new(
        read_model: Arc<ReadModel>,
        snapshots: Arc<dyn SharedBookStore>,
        multi_instance: Arc<HashSet<MarketKey>>,
        default_depth: usize,
    ) -> Self {
        Self {
            read_model,
            snapshots,
            multi_instance,
            default_depth,
        }
    }

    /// `None` when nothing has happened in the market yet.
    pub async fn market_data(&self, market: MarketKey) -> Result<Option<MarketDataSnapshot>, EngineError> {
        if !self.multi_instance.contains(&market) {
            return Ok(self.read_model.market_data(market));
        }
        Ok(self.snapshots.get(market).await?.map(|s| MarketDataSnapshot {
            market: s.market,
            best_bid: s.best_bid,
            best_ask: s.best_ask,
            last_price: s.last_trade_price,
            volume_24h: s.volume_24h,
            total_volume: s.total_volume,
            sequence: s.sequence,
        }))
    }

    /// Depth with at most `levels` price levels per side.
    pub async fn order_book(&self, market: MarketKey, levels: Option<usize>) -> Result<Option<BookDepth>, EngineError> {
        let levels = levels.unwrap_or(self.default_depth);
        if !self.multi_instance.contains(&market) {
            return Ok(self.read_model.depth(market, levels));
        }
        Ok(self.snapshots.get(market).await?.map(|s| s.depth.truncated(levels)))
    }

    /// Newest first.
    pub fn recent_trades(&self, market: MarketKey, limit: usize) -> Vec<Trade> {
        self.read_model.recent_trades(market, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dto::EngineNotification;
    use crate::domain::entities::{Order, Side};
    use crate::domain::orderbook::{BookSnapshot, OrderBook, PriceTimeOrderBook};
    use crate::domain::price::Price;
    use crate::infrastructure::snapshot_store::InMemorySnapshotStore;

    const LOCAL: MarketKey = MarketKey::new(50, 1);
    const SHARED: MarketKey = MarketKey::new(50, 2);

    fn service(snapshots: Arc<InMemorySnapshotStore>) -> (QueryService, Arc<ReadModel>) {
        let read_model = Arc::new(ReadModel::default());
        let multi: HashSet<MarketKey> = [SHARED].into_iter().collect();
        (
            QueryService::new(read_model.clone(), snapshots, Arc::new(multi), 10),
            read_model,
        )
    }

    #[tokio::test]
    async fn test_local_market_reads_read_model() {
        let (queries, read_model) = service(Arc::new(InMemorySnapshotStore::new()));
        assert!(queries.market_data(LOCAL).await.unwrap().is_none());

        let mut book = PriceTimeOrderBook::new(LOCAL);
        book.insert(Order::new(1, LOCAL, 1, Side::Buy, Price::from_ticks(4_500), 5, 1));
        read_model.apply(&EngineNotification::OrderBookChanged {
            market: LOCAL,
            sequence: 1,
            best_bid: book.best_bid(),
            best_ask: None,
            last_price: None,
            total_volume: 0,
            depth: book.depth(10),
        });

        let data = queries.market_data(LOCAL).await.unwrap().unwrap();
        assert_eq!(data.best_bid, Some(Price::from_ticks(4_500)));
        assert_eq!(data.sequence, 1);
        let depth = queries.order_book(LOCAL, Some(1)).await.unwrap().unwrap();
        assert_eq!(depth.bids.len(), 1);
    }

    #[tokio::test]
    async fn test_shared_market_reads_snapshot_store() {
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let (queries, _) = service(snapshots.clone());

        let mut book = PriceTimeOrderBook::new(SHARED);
        book.insert(Order::new(1, SHARED, 1, Side::Sell, Price::from_ticks(7_000), 10, 1));
        snapshots.put(BookSnapshot::capture(&book, 4, 10, 0, 1)).await.unwrap();

        let data = queries.market_data(SHARED).await.unwrap().unwrap();
        assert_eq!(data.best_ask, Some(Price::from_ticks(7_000)));
        assert_eq!(data.sequence, 4);

        snapshots.set_unavailable(true);
        let err = queries.market_data(SHARED).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
