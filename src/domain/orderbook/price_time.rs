/// Price-time priority order book
///
/// Each side is a `BTreeMap` from price to a FIFO queue of resting orders.
/// Bids are read from the highest key, asks from the lowest. An index from
/// order id to `(side, price)` locates an order's level for cancellation;
/// removal inside the level is a linear scan, which keeps the queue order
/// intact.
///
/// Complexity:
/// - `insert`: O(log P) plus a scan from the back of the level (O(1) when
///   timestamps arrive in order)
/// - `peek_best` / `remove_best`: O(log P)
/// - `remove`: O(log P + L) for a level holding L orders

use super::snapshot::BookSnapshot;
use super::traits::{BookDepth, DepthLevel, OrderBook};
use crate::domain::entities::{MarketKey, Order, OrderId, Side};
use crate::domain::price::Price;
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTimeOrderBook {
    market: MarketKey,
    bids: BTreeMap<Price, VecDeque<Order>>,
    asks: BTreeMap<Price, VecDeque<Order>>,
    index: HashMap<OrderId, (Side, Price)>,
    last_trade_price: Option<Price>,
    total_volume: u64,
}

impl PriceTimeOrderBook {
    pub fn new(market: MarketKey) -> Self {
        Self {
            market,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: HashMap::new(),
            last_trade_price: None,
            total_volume: 0,
        }
    }

    /// Restores a book from a published snapshot.
    pub fn from_snapshot(snapshot: &BookSnapshot) -> Self {
        let mut book = Self::new(snapshot.market);
        for order in &snapshot.orders {
            book.insert(order.clone());
        }
        book.last_trade_price = snapshot.last_trade_price;
        book.total_volume = snapshot.total_volume;
        book
    }

    pub fn market(&self) -> MarketKey {
        self.market
    }

    /// All resting orders, bids best-first then asks best-first.
    pub fn resting_orders(&self) -> Vec<Order> {
        self.bids
            .values()
            .rev()
            .chain(self.asks.values())
            .flat_map(|level| level.iter().cloned())
            .collect()
    }

    /// Resting orders on one side in priority order.
    pub fn orders_on(&self, side: Side) -> Vec<&Order> {
        match side {
            Side::Buy => self.bids.values().rev().flat_map(|l| l.iter()).collect(),
            Side::Sell => self.asks.values().flat_map(|l| l.iter()).collect(),
        }
    }

    #[inline]
    fn levels_mut(&mut self, side: Side) -> &mut BTreeMap<Price, VecDeque<Order>> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    #[inline]
    fn best_level_price(&self, side: Side) -> Option<Price> {
        match side {
            Side::Buy => self.bids.keys().next_back().copied(),
            Side::Sell => self.asks.keys().next().copied(),
        }
    }

    fn aggregate<'a>(levels: impl Iterator<Item = (&'a Price, &'a VecDeque<Order>)>, n: usize) -> Vec<DepthLevel> {
        levels
            .take(n)
            .map(|(price, queue)| DepthLevel {
                price: *price,
                quantity: queue.iter().map(|o| o.remaining).sum(),
                orders: queue.len(),
            })
            .collect()
    }
}

impl OrderBook for PriceTimeOrderBook {
    fn insert(&mut self, order: Order) {
        if self.index.contains_key(&order.id) {
            tracing::warn!(market = %self.market, order_id = order.id, "duplicate order id ignored");
            return;
        }
        self.index.insert(order.id, (order.side, order.price));
        let level = self.levels_mut(order.side).entry(order.price).or_default();
        // 同价位按提交时间排队；正常情况下直接追加到队尾
        let pos = level
            .iter()
            .rposition(|o| o.submitted_at <= order.submitted_at)
            .map_or(0, |p| p + 1);
        level.insert(pos, order);
    }

    fn peek_best(&self, side: Side) -> Option<&Order> {
        let level = match side {
            Side::Buy => self.bids.values().next_back(),
            Side::Sell => self.asks.values().next(),
        };
        level.and_then(|q| q.front())
    }

    fn peek_best_mut(&mut self, side: Side) -> Option<&mut Order> {
        let level = match side {
            Side::Buy => self.bids.values_mut().next_back(),
            Side::Sell => self.asks.values_mut().next(),
        };
        level.and_then(|q| q.front_mut())
    }

    fn remove_best(&mut self, side: Side) -> Option<Order> {
        let price = self.best_level_price(side)?;
        let levels = self.levels_mut(side);
        let queue = levels.get_mut(&price)?;
        let order = queue.pop_front();
        if queue.is_empty() {
            levels.remove(&price);
        }
        if let Some(o) = &order {
            self.index.remove(&o.id);
        }
        order
    }

    fn remove(&mut self, order_id: OrderId) -> Option<Order> {
        let (side, price) = self.index.remove(&order_id)?;
        let levels = self.levels_mut(side);
        let queue = levels.get_mut(&price)?;
        let pos = queue.iter().position(|o| o.id == order_id)?;
        let order = queue.remove(pos);
        if queue.is_empty() {
            levels.remove(&price);
        }
        order
    }

    fn get(&self, order_id: OrderId) -> Option<&Order> {
        let (side, price) = self.index.get(&order_id)?;
        let levels = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        levels.get(price)?.iter().find(|o| o.id == order_id)
    }

    fn get_mut(&mut self, order_id: OrderId) -> Option<&mut Order> {
        let (side, price) = *self.index.get(&order_id)?;
        self.levels_mut(side)
            .get_mut(&price)?
            .iter_mut()
            .find(|o| o.id == order_id)
    }

    fn record_trade(&mut self, price: Price, quantity: u64) {
        self.last_trade_price = Some(price);
        self.total_volume = self.total_volume.saturating_add(quantity);
    }

    fn last_trade_price(&self) -> Option<Price> {
        self.last_trade_price
    }

    fn total_volume(&self) -> u64 {
        self.total_volume
    }

    fn depth(&self, levels: usize) -> BookDepth {
        BookDepth {
            bids: Self::aggregate(self.bids.iter().rev(), levels),
            asks: Self::aggregate(self.asks.iter(), levels),
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}
