/// OrderBook Trait - Domain Layer Abstraction
///
/// This trait defines the interface the matching algorithm and the replay
/// logic need from a book. Implementations are free to choose their ordered
/// container as long as:
/// - `peek_best` / `remove_best` / `insert` stay O(log n) or better
/// - orders at the same price are served in submission-time order (FIFO)
///
/// ## Implementations
/// - `PriceTimeOrderBook`: `BTreeMap` of price levels holding `VecDeque`s
///
/// ## Example
/// ```rust
/// use outcome_engine::domain::entities::{MarketKey, Order, Side};
/// use outcome_engine::domain::orderbook::{OrderBook, PriceTimeOrderBook};
/// use outcome_engine::domain::price::Price;
///
/// let market = MarketKey::new(1, 1);
/// let mut book = PriceTimeOrderBook::new(market);
/// book.insert(Order::new(1, market, 7, Side::Sell, Price::from_ticks(7_000), 10, 1));
/// assert_eq!(book.best_ask(), Some(Price::from_ticks(7_000)));
/// assert_eq!(book.best_bid(), None);
/// ```

use crate::domain::entities::{Order, OrderId, Side};
use crate::domain::price::Price;
use serde::{Deserialize, Serialize};

/// Aggregated quantity resting at one price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Price,
    pub quantity: u64,
    pub orders: usize,
}

/// Top-of-book depth, best level first on each side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDepth {
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

impl BookDepth {
    /// Returns a copy limited to the first `levels` entries per side.
    pub fn truncated(&self, levels: usize) -> BookDepth {
        BookDepth {
            bids: self.bids.iter().take(levels).cloned().collect(),
            asks: self.asks.iter().take(levels).cloned().collect(),
        }
    }
}

/// Core OrderBook trait
pub trait OrderBook {
    /// Adds a resting order, keeping price-time order.
    fn insert(&mut self, order: Order);

    /// Best resting order on `side`, or `None` when the side has no liquidity.
    fn peek_best(&self, side: Side) -> Option<&Order>;

    /// Mutable access to the best order; used to apply partial fills in place.
    fn peek_best_mut(&mut self, side: Side) -> Option<&mut Order>;

    /// Pops the best order on `side`.
    fn remove_best(&mut self, side: Side) -> Option<Order>;

    /// Removes an order anywhere in the book. Unknown ids are a no-op.
    fn remove(&mut self, order_id: OrderId) -> Option<Order>;

    fn get(&self, order_id: OrderId) -> Option<&Order>;

    fn get_mut(&mut self, order_id: OrderId) -> Option<&mut Order>;

    /// Records an execution for last-price and volume statistics.
    fn record_trade(&mut self, price: Price, quantity: u64);

    fn last_trade_price(&self) -> Option<Price>;

    fn total_volume(&self) -> u64;

    /// Aggregated depth, at most `levels` price levels per side.
    fn depth(&self, levels: usize) -> BookDepth;

    fn len(&self) -> usize;

    /// Applies a recorded fill to a resting order, dropping it once filled.
    ///
    /// Returns what is left of the order, `None` for unknown ids.
    fn reduce(&mut self, order_id: OrderId, quantity: u64) -> Option<u64> {
        let order = self.get_mut(order_id)?;
        order.fill(quantity);
        let remaining = order.remaining;
        if remaining == 0 {
            self.remove(order_id);
        }
        Some(remaining)
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn best_bid(&self) -> Option<Price> {
        self.peek_best(Side::Buy).map(|o| o.price)
    }

    fn best_ask(&self) -> Option<Price> {
        self.peek_best(Side::Sell).map(|o| o.price)
    }

    /// Spread in ticks, `None` unless both sides are present and uncrossed.
    fn spread(&self) -> Option<u64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) if ask > bid => Some(ask.ticks() - bid.ticks()),
            _ => None,
        }
    }

    fn mid_price(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(Price::from_ticks((bid.ticks() + ask.ticks()) / 2)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::MarketKey;

    // Minimal top-of-book mock for the provided methods
    struct MockOrderBook {
        bid: Option<Order>,
        ask: Option<Order>,
    }

    impl OrderBook for MockOrderBook {
        fn insert(&mut self, _order: Order) {}
        fn peek_best(&self, side: Side) -> Option<&Order> {
            match side {
                Side::Buy => self.bid.as_ref(),
                Side::Sell => self.ask.as_ref(),
            }
        }
        fn peek_best_mut(&mut self, _side: Side) -> Option<&mut Order> {
            None
        }
        fn remove_best(&mut self, _side: Side) -> Option<Order> {
            None
        }
        fn remove(&mut self, _order_id: OrderId) -> Option<Order> {
            None
        }
        fn get(&self, _order_id: OrderId) -> Option<&Order> {
            None
        }
        fn get_mut(&mut self, _order_id: OrderId) -> Option<&mut Order> {
            None
        }
        fn record_trade(&mut self, _price: Price, _quantity: u64) {}
        fn last_trade_price(&self) -> Option<Price> {
            None
        }
        fn total_volume(&self) -> u64 {
            0
        }
        fn depth(&self, _levels: usize) -> BookDepth {
            BookDepth::default()
        }
        fn len(&self) -> usize {
            self.bid.iter().count() + self.ask.iter().count()
        }
    }

    fn at(side: Side, ticks: u64) -> Order {
        Order::new(1, MarketKey::new(1, 1), 1, side, Price::from_ticks(ticks), 1, 1)
    }

    #[test]
    fn test_trait_spread_calculation() {
        let mock = MockOrderBook {
            bid: Some(at(Side::Buy, 4_900)),
            ask: Some(at(Side::Sell, 5_100)),
        };

        assert_eq!(mock.spread(), Some(200));
        assert_eq!(mock.mid_price(), Some(Price::from_ticks(5_000)));
    }

    #[test]
    fn test_trait_empty_orderbook() {
        let mock = MockOrderBook { bid: None, ask: None };

        assert!(mock.is_empty());
        assert_eq!(mock.spread(), None);
        assert_eq!(mock.mid_price(), None);
    }

    #[test]
    fn test_depth_truncation() {
        let level = |t| DepthLevel { price: Price::from_ticks(t), quantity: 1, orders: 1 };
        let depth = BookDepth {
            bids: vec![level(50), level(40), level(30)],
            asks: vec![level(60)],
        };
        let top = depth.truncated(2);
        assert_eq!(top.bids.len(), 2);
        assert_eq!(top.asks.len(), 1);
    }
}
