/// Use Cases - write-path operations on a locked market
///
/// Each use case receives the `MarketState` of a market whose mutex the
/// caller already holds, so the single-process core and the distributed
/// coordinator share the exact same mutation logic.
///
/// ## Available Use Cases
/// - `MatchOrderUseCase`: match a new order, persist its events
/// - `CancelOrderUseCase`: remove a resting order, persist the cancellation

pub mod cancel_order;
pub mod context;
pub mod match_order;

pub use cancel_order::CancelOrderUseCase;
pub use context::ExecutionContext;
pub use match_order::MatchOrderUseCase;
