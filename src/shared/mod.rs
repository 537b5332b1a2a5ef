/// Shared utilities and types used across all layers
///
/// This module contains:
/// - Protocol definitions (client commands and messages)
/// - Utilities (timestamp, id generation, warning throttle)
/// - Prometheus metrics

pub mod ids;
pub mod metrics;
pub mod protocol;
pub mod throttle;
pub mod timestamp;

pub use ids::IdGenerator;
pub use protocol::{CancelOrderCommand, ClientMessage, CreateOrderCommand, ValidatedOrder};
pub use throttle::WarnLimiter;
pub use timestamp::{monotonic_after, now_millis, now_nanos};
