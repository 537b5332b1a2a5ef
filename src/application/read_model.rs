/// Read model - market data projection
///
/// Built from engine notifications, never from the books themselves, so
/// queries do not contend with the write path for market mutexes. Each
/// market view keeps top of book, aggregated depth, a rolling 24h volume
/// window and a bounded list of recent trades. Notifications older than
/// what a view has already seen are ignored, which makes redelivery safe.

use super::dto::{EngineNotification, MarketDataSnapshot};
use super::volume::VolumeWindow;
use crate::domain::entities::{MarketKey, Trade};
use crate::domain::orderbook::BookDepth;
use crate::domain::price::Price;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
struct MarketView {
    market: MarketKey,
    book_sequence: u64,
    trade_sequence: u64,
    best_bid: Option<Price>,
    best_ask: Option<Price>,
    last_price: Option<Price>,
    total_volume: u64,
    depth: BookDepth,
    window: VolumeWindow,
    recent: VecDeque<Trade>,
}

impl MarketView {
    fn new(market: MarketKey) -> Self {
        Self {
            market,
            book_sequence: 0,
            trade_sequence: 0,
            best_bid: None,
            best_ask: None,
            last_price: None,
            total_volume: 0,
            depth: BookDepth::default(),
            window: VolumeWindow::new(),
            recent: VecDeque::new(),
        }
    }
}

#[derive(Debug)]
pub struct ReadModel {
    views: RwLock<HashMap<MarketKey, MarketView>>,
    recent_capacity: usize,
}

impl ReadModel {
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            views: RwLock::new(HashMap::new()),
            recent_capacity,
        }
    }

    pub fn apply(&self, notification: &EngineNotification) {
        let mut views = self.views.write();
        match notification {
            EngineNotification::TradeExecuted { sequence, trade } => {
                let view = views
                    .entry(trade.market)
                    .or_insert_with(|| MarketView::new(trade.market));
                if *sequence <= view.trade_sequence {
                    return;
                }
                view.trade_sequence = *sequence;
                view.last_price = Some(trade.price);
                view.window.record(trade.executed_at, trade.quantity);
                view.recent.push_front(trade.clone());
                view.recent.truncate(self.recent_capacity);
            }
            EngineNotification::OrderBookChanged {
                market,
                sequence,
                best_bid,
                best_ask,
                last_price,
                total_volume,
                depth,
            } => {
                let view = views.entry(*market).or_insert_with(|| MarketView::new(*market));
                if *sequence <= view.book_sequence {
                    return;
                }
                view.book_sequence = *sequence;
                view.best_bid = *best_bid;
                view.best_ask = *best_ask;
                view.last_price = last_price.or(view.last_price);
                view.total_volume = *total_volume;
                view.depth = depth.clone();
            }
            EngineNotification::LateResult { .. }
            | EngineNotification::LateFailure { .. }
            | EngineNotification::MarketSuspended { .. } => {}
        }
    }

    /// Drops a market's view, e.g. before it is rebuilt.
    pub fn reset(&self, market: MarketKey) {
        self.views.write().remove(&market);
    }

    pub fn market_data(&self, market: MarketKey) -> Option<MarketDataSnapshot> {
        let views = self.views.read();
        let view = views.get(&market)?;
        Some(MarketDataSnapshot {
            market: view.market,
            best_bid: view.best_bid,
            best_ask: view.best_ask,
            last_price: view.last_price,
            volume_24h: view.window.volume_24h(),
            total_volume: view.total_volume,
            sequence: view.book_sequence.max(view.trade_sequence),
        })
    }

    pub fn volume_24h(&self, market: MarketKey) -> u64 {
        self.views
            .read()
            .get(&market)
            .map_or(0, |v| v.window.volume_24h())
    }

    pub fn depth(&self, market: MarketKey, levels: usize) -> Option<BookDepth> {
        self.views.read().get(&market).map(|v| v.depth.truncated(levels))
    }

    /// Most recent trades first.
    pub fn recent_trades(&self, market: MarketKey, limit: usize) -> Vec<Trade> {
        self.views
            .read()
            .get(&market)
            .map(|v| v.recent.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for ReadModel {
    fn default() -> Self {
        Self::new(100)
    }
}
