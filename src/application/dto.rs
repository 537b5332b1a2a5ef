/// Data Transfer Objects
///
/// Results returned to callers, notifications sent to outbound subscribers
/// and the messages the CLI driver writes back to its client.

use crate::domain::entities::{MarketKey, Order, OrderId, Trade};
use crate::domain::matching::MakerFill;
use crate::domain::orderbook::BookDepth;
use crate::domain::price::Price;
use serde::{Deserialize, Serialize};

/// Result of a submitted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// The order after matching (status and remaining are final for this call).
    pub order: Order,
    pub trades: Vec<Trade>,
    pub maker_fills: Vec<MakerFill>,
    /// Sequence of the last event written for this order.
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    /// The cancelled order with the quantity it still had.
    pub order: Order,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketDataSnapshot {
    pub market: MarketKey,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub last_price: Option<Price>,
    pub volume_24h: u64,
    pub total_volume: u64,
    pub sequence: u64,
}

/// Outbound notifications, delivered at least once.
///
/// Subscribers deduplicate by `(market, kind, sequence)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineNotification {
    TradeExecuted {
        sequence: u64,
        trade: Trade,
    },
    OrderBookChanged {
        market: MarketKey,
        sequence: u64,
        best_bid: Option<Price>,
        best_ask: Option<Price>,
        last_price: Option<Price>,
        total_volume: u64,
        depth: BookDepth,
    },
    /// An order finished after its caller stopped waiting.
    LateResult {
        outcome: MatchOutcome,
    },
    /// An order failed after its caller stopped waiting.
    LateFailure {
        order_id: OrderId,
        market: MarketKey,
        reason: String,
        retryable: bool,
    },
    MarketSuspended {
        market: MarketKey,
        reason: String,
    },
}

impl EngineNotification {
    pub fn market(&self) -> MarketKey {
        match self {
            EngineNotification::TradeExecuted { trade, .. } => trade.market,
            EngineNotification::OrderBookChanged { market, .. } => *market,
            EngineNotification::LateResult { outcome } => outcome.order.market,
            EngineNotification::LateFailure { market, .. } => *market,
            EngineNotification::MarketSuspended { market, .. } => *market,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineNotification::TradeExecuted { .. } => "trade_executed",
            EngineNotification::OrderBookChanged { .. } => "order_book_changed",
            EngineNotification::LateResult { .. } => "late_result",
            EngineNotification::LateFailure { .. } => "late_failure",
            EngineNotification::MarketSuspended { .. } => "market_suspended",
        }
    }

    /// Event sequence this notification describes, if any.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            EngineNotification::TradeExecuted { sequence, .. } => Some(*sequence),
            EngineNotification::OrderBookChanged { sequence, .. } => Some(*sequence),
            EngineNotification::LateResult { outcome } => Some(outcome.sequence),
            EngineNotification::LateFailure { .. } => None,
            EngineNotification::MarketSuspended { .. } => None,
        }
    }
}

/// Messages written back by the CLI driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    OrderAccepted(MatchOutcome),
    OrderCancelled(CancelOutcome),
    MarketData {
        market: MarketKey,
        snapshot: Option<MarketDataSnapshot>,
    },
    OrderBook {
        market: MarketKey,
        depth: Option<BookDepth>,
    },
    Trades {
        market: MarketKey,
        trades: Vec<Trade>,
    },
    Rejected {
        reason: String,
        retryable: bool,
    },
}
