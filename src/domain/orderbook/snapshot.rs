/// Published book state
///
/// A `BookSnapshot` is what the current writer of a market publishes after
/// every mutation. It is tagged with the last applied event sequence so
/// readers can tell which snapshot is newer, and it carries the resting
/// orders so another instance can restore the book without replaying the
/// whole log.

use super::price_time::PriceTimeOrderBook;
use super::traits::{BookDepth, OrderBook};
use crate::domain::entities::{MarketKey, Order};
use crate::domain::price::Price;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub market: MarketKey,
    pub sequence: u64,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub last_trade_price: Option<Price>,
    pub total_volume: u64,
    /// Rolling 24h traded quantity as seen by the publisher.
    pub volume_24h: u64,
    pub depth: BookDepth,
    pub orders: Vec<Order>,
    pub published_at: u64,
}

impl BookSnapshot {
    pub fn capture(
        book: &PriceTimeOrderBook,
        sequence: u64,
        depth_levels: usize,
        volume_24h: u64,
        published_at: u64,
    ) -> Self {
        Self {
            market: book.market(),
            sequence,
            best_bid: book.best_bid(),
            best_ask: book.best_ask(),
            last_trade_price: book.last_trade_price(),
            total_volume: book.total_volume(),
            volume_24h,
            depth: book.depth(depth_levels),
            orders: book.resting_orders(),
            published_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Side;

    #[test]
    fn test_capture_and_restore() {
        let market = MarketKey::new(3, 1);
        let mut book = PriceTimeOrderBook::new(market);
        book.insert(Order::new(1, market, 1, Side::Buy, Price::from_ticks(4_000), 5, 1));
        book.insert(Order::new(2, market, 2, Side::Buy, Price::from_ticks(4_000), 3, 2));
        book.insert(Order::new(3, market, 3, Side::Sell, Price::from_ticks(6_000), 4, 3));
        book.record_trade(Price::from_ticks(5_000), 9);

        let snap = BookSnapshot::capture(&book, 12, 10, 9, 100);
        assert_eq!(snap.sequence, 12);
        assert_eq!(snap.best_bid, Some(Price::from_ticks(4_000)));
        assert_eq!(snap.depth.bids[0].quantity, 8);

        let restored = PriceTimeOrderBook::from_snapshot(&snap);
        assert_eq!(restored, book);
    }
}
