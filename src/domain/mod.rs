/// Domain Layer - Core Business Logic
///
/// Pure business logic with no I/O: the order book, the matching algorithm,
/// entities, events and command validation. Everything here is synchronous
/// and can be tested in isolation.
///
/// ## Modules
/// - `orderbook`: price-time priority book
/// - `matching`: continuous double auction
/// - `entities`: orders, trades, market keys
/// - `events`: event-log records
/// - `price`: fixed-point probability prices
/// - `validation`: write-path structural checks

pub mod entities;
pub mod events;
pub mod matching;
pub mod orderbook;
pub mod price;
pub mod validation;

pub use entities::{AccountId, MarketKey, Order, OrderId, OrderStatus, Side, Trade, TradeId};
pub use events::{EventKind, MarketEvent};
pub use matching::{match_order, MakerFill, MatchResult};
pub use orderbook::{BookDepth, BookSnapshot, DepthLevel, OrderBook, PriceTimeOrderBook};
pub use price::Price;
