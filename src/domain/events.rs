/// Market events recorded in the per-market event log
///
/// Every mutation of a book is described by one or more events. A submitted
/// order produces one `OrderSubmitted` followed by one `TradeExecuted` per
/// fill, with consecutive sequence numbers. Replaying the events of a market
/// in sequence order rebuilds its book exactly.

use super::entities::{AccountId, MarketKey, Order, OrderId, Trade};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// The order as accepted, before any fill.
    OrderSubmitted { order: Order },

    OrderCancelled {
        order_id: OrderId,
        account_id: AccountId,
        remaining: u64,
    },

    TradeExecuted { trade: Trade },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketEvent {
    /// Strictly increasing per market, starting at 1, without gaps.
    pub sequence: u64,
    pub market: MarketKey,
    /// Instance that applied the mutation.
    pub instance_id: String,
    pub timestamp: u64,
    pub kind: EventKind,
}

impl MarketEvent {
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            EventKind::OrderSubmitted { .. } => "order_submitted",
            EventKind::OrderCancelled { .. } => "order_cancelled",
            EventKind::TradeExecuted { .. } => "trade_executed",
        }
    }

    pub fn trade(&self) -> Option<&Trade> {
        match &self.kind {
            EventKind::TradeExecuted { trade } => Some(trade),
            _ => None,
        }
    }
}
