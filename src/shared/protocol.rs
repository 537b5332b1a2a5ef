use crate::domain::entities::{AccountId, MarketKey, OrderId, Side};
use crate::domain::price::Price;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 下单命令（写路径入口），字段可缺省以便校验时给出明确的缺失字段错误
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateOrderCommand {
    pub market: Option<MarketKey>,
    pub account_id: Option<AccountId>,
    /// "buy" or "sell"
    pub side: Option<String>,
    /// Only "limit" is accepted; absent means limit.
    pub order_type: Option<String>,
    /// Implied probability, e.g. 0.55
    pub price: Option<Decimal>,
    pub quantity: Option<u64>,
}

/// 撤单命令
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CancelOrderCommand {
    pub order_id: Option<OrderId>,
    pub market: Option<MarketKey>,
    pub account_id: Option<AccountId>,
}

/// 通过校验的订单，由撮合核心直接接收
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedOrder {
    pub market: MarketKey,
    pub account_id: AccountId,
    pub side: Side,
    pub price: Price,
    pub quantity: u64,
}

/// 客户端发送给引擎的所有消息的顶层枚举
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateOrder(CreateOrderCommand),
    CancelOrder(CancelOrderCommand),
    MarketData { market: MarketKey },
    OrderBook { market: MarketKey, depth: Option<usize> },
    RecentTrades { market: MarketKey, limit: Option<usize> },
}
