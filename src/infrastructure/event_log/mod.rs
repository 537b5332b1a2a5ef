/// Event Log - per-market append-only history
///
/// Every accepted order, cancellation and trade is appended here in the
/// order it was applied to the book. Sequences are per market, start at 1
/// and never skip; `append` refuses a batch that does not continue exactly
/// where the log ends, which is how a writer with a stale view of the market
/// finds out that someone else has written since.
///
/// ## Implementations
/// - `InMemoryEventLog`: tests and single-process deployments
/// - `FileEventLog`: one framed, checksummed file per market
///
/// The log also keeps consumer offsets so downstream readers (settlement,
/// projections) can resume from their last committed sequence.

pub mod file;
pub mod memory;

pub use file::FileEventLog;
pub use memory::InMemoryEventLog;

use crate::domain::entities::MarketKey;
use crate::domain::events::MarketEvent;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    /// Damage before the last frame. Never repaired automatically.
    #[error("event log for {market} corrupted at byte {offset}: {reason}")]
    Corrupted { market: MarketKey, offset: u64, reason: String },

    #[error("sequence conflict on {market}: expected {expected}, got {got}")]
    SequenceConflict { market: MarketKey, expected: u64, got: u64 },

    #[error("batch for {market} contains an event for {found}")]
    WrongMarket { market: MarketKey, found: MarketKey },

    #[error("event log unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends a contiguous batch. Returns the last sequence written.
    ///
    /// The batch is written entirely or not at all.
    async fn append(&self, market: MarketKey, events: &[MarketEvent]) -> Result<u64, EventLogError>;

    /// All events of `market` with `sequence >= from_sequence`, in order.
    async fn read_from(&self, market: MarketKey, from_sequence: u64) -> Result<Vec<MarketEvent>, EventLogError>;

    /// Highest sequence written for `market`, 0 when empty.
    async fn last_sequence(&self, market: MarketKey) -> Result<u64, EventLogError>;

    /// Markets with at least one event.
    async fn markets(&self) -> Result<Vec<MarketKey>, EventLogError>;

    async fn commit_offset(&self, consumer: &str, market: MarketKey, sequence: u64) -> Result<(), EventLogError>;

    /// Last committed sequence for `consumer`, 0 if it never committed.
    async fn committed_offset(&self, consumer: &str, market: MarketKey) -> Result<u64, EventLogError>;
}

/// Checks that `events` continue a log ending at `last`.
pub(crate) fn check_batch(market: MarketKey, last: u64, events: &[MarketEvent]) -> Result<(), EventLogError> {
    let mut expected = last + 1;
    for event in events {
        if event.market != market {
            return Err(EventLogError::WrongMarket { market, found: event.market });
        }
        if event.sequence != expected {
            return Err(EventLogError::SequenceConflict {
                market,
                expected,
                got: event.sequence,
            });
        }
        expected += 1;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::entities::{MarketKey, Order, Side};
    use crate::domain::events::{EventKind, MarketEvent};
    use crate::domain::price::Price;

    pub fn submitted(market: MarketKey, sequence: u64, order_id: u64) -> MarketEvent {
        MarketEvent {
            sequence,
            market,
            instance_id: "test".into(),
            timestamp: sequence,
            kind: EventKind::OrderSubmitted {
                order: Order::new(order_id, market, 1, Side::Buy, Price::from_ticks(5_000), 10, sequence),
            },
        }
    }
}
