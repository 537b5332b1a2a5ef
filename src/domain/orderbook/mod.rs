/// Domain Layer - OrderBook Module
///
/// Contains the per-market order book. Pure business rules, no I/O.
///
/// ## Production Implementation
/// - `PriceTimeOrderBook`: ordered price levels with FIFO queues
///
/// ## Trait Abstraction
/// The `OrderBook` trait is what the matching algorithm and replay are
/// written against.

pub mod price_time;
pub mod snapshot;
pub mod traits;

pub use price_time::PriceTimeOrderBook;
pub use snapshot::BookSnapshot;
pub use traits::{BookDepth, DepthLevel, OrderBook};
