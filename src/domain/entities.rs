/// Domain entities: markets, orders and trades
///
/// Orders and trades are plain values. The only fields of an `Order` that
/// change after creation are `remaining` and `status`; the price, quantity and
/// submission timestamp are fixed for the life of the order.

use super::price::Price;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub type OrderId = u64;
pub type AccountId = u64;

/// Outcome market identifier: a milestone paired with one of its options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketKey {
    pub milestone_id: u64,
    pub option_id: u64,
}

impl MarketKey {
    pub const fn new(milestone_id: u64, option_id: u64) -> Self {
        Self { milestone_id, option_id }
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.milestone_id, self.option_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid market key '{0}', expected <milestone>:<option>")]
pub struct MarketKeyParseError(pub String);

impl FromStr for MarketKey {
    type Err = MarketKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (milestone, option) = s
            .split_once(':')
            .ok_or_else(|| MarketKeyParseError(s.to_string()))?;
        let milestone_id = milestone
            .trim()
            .parse()
            .map_err(|_| MarketKeyParseError(s.to_string()))?;
        let option_id = option
            .trim()
            .parse()
            .map_err(|_| MarketKeyParseError(s.to_string()))?;
        Ok(Self { milestone_id, option_id })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
}

/// A limit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub market: MarketKey,
    pub account_id: AccountId,
    pub side: Side,
    pub price: Price,
    pub quantity: u64,
    pub remaining: u64,
    pub status: OrderStatus,
    /// Nanoseconds; FIFO tie-break between orders at the same price.
    pub submitted_at: u64,
}

impl Order {
    pub fn new(
        id: OrderId,
        market: MarketKey,
        account_id: AccountId,
        side: Side,
        price: Price,
        quantity: u64,
        submitted_at: u64,
    ) -> Self {
        Self {
            id,
            market,
            account_id,
            side,
            price,
            quantity,
            remaining: quantity,
            status: OrderStatus::Pending,
            submitted_at,
        }
    }

    #[inline]
    pub fn filled_quantity(&self) -> u64 {
        self.quantity - self.remaining
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::PartiallyFilled)
    }

    /// Applies a fill of `qty`, clamped to what is left.
    ///
    /// Returns the quantity actually filled.
    pub fn fill(&mut self, qty: u64) -> u64 {
        let filled = qty.min(self.remaining);
        self.remaining -= filled;
        self.status = if self.remaining == 0 {
            OrderStatus::Filled
        } else if self.remaining < self.quantity {
            OrderStatus::PartiallyFilled
        } else {
            self.status
        };
        filled
    }

    pub fn cancel(&mut self) {
        self.status = OrderStatus::Cancelled;
    }

    /// Whether an order at `resting` on the opposite side can trade with this one.
    #[inline]
    pub fn crosses(&self, resting: Price) -> bool {
        match self.side {
            Side::Buy => resting <= self.price,
            Side::Sell => resting >= self.price,
        }
    }
}

/// Trade identity: the market plus the sequence number of the event that recorded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TradeId {
    pub market: MarketKey,
    pub sequence: u64,
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.market, self.sequence)
    }
}

/// An executed trade. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub market: MarketKey,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer_account_id: AccountId,
    pub seller_account_id: AccountId,
    /// Always the resting (maker) order's price.
    pub price: Price,
    pub quantity: u64,
    pub taker_side: Side,
    pub executed_at: u64,
}

impl Trade {
    /// Builds the trade between an incoming taker and a resting maker.
    pub fn between(
        id: TradeId,
        taker: &Order,
        maker: &Order,
        quantity: u64,
        executed_at: u64,
    ) -> Self {
        let (buy, sell) = match taker.side {
            Side::Buy => (taker, maker),
            Side::Sell => (maker, taker),
        };
        Self {
            id,
            market: taker.market,
            buy_order_id: buy.id,
            sell_order_id: sell.id,
            buyer_account_id: buy.account_id,
            seller_account_id: sell.account_id,
            price: maker.price,
            quantity,
            taker_side: taker.side,
            executed_at,
        }
    }
}
