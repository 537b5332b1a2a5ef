/// Application errors
///
/// `CommandError` is what callers of the write path see. Its two variants
/// split the world into "the request is wrong" (`Validation`, never worth
/// retrying) and "the engine could not process it right now" (`Processing`,
/// see `EngineError::is_retryable`).

use crate::domain::entities::{AccountId, MarketKey, OrderId};
use crate::domain::validation::ValidationError;
use crate::infrastructure::event_log::EventLogError;
use crate::infrastructure::lease::LeaseError;
use crate::infrastructure::snapshot_store::SnapshotStoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("sequence gap on {market}: expected {expected}, found {found}")]
    SequenceGap { market: MarketKey, expected: u64, found: u64 },

    #[error("inconsistent event {sequence} on {market}: {reason}")]
    Inconsistent { market: MarketKey, sequence: u64, reason: String },

    #[error(transparent)]
    Log(#[from] EventLogError),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("submission queue of partition {partition} is full")]
    QueueSaturated { partition: usize },

    #[error("market {0} is being written by another instance")]
    MarketBusy(MarketKey),

    #[error("order {order_id} did not complete before its deadline")]
    Timeout { order_id: OrderId },

    #[error("market {market} is suspended: {reason}")]
    MarketSuspended { market: MarketKey, reason: String },

    #[error("order {order_id} not found in {market}")]
    OrderNotFound { market: MarketKey, order_id: OrderId },

    #[error("order {order_id} does not belong to account {account_id}")]
    NotOwner { order_id: OrderId, account_id: AccountId },

    #[error("failed to persist events for {market}: {source}")]
    Durability {
        market: MarketKey,
        #[source]
        source: EventLogError,
    },

    #[error("local state of {market} was stale and will be rebuilt")]
    StaleState { market: MarketKey },

    #[error("lease error: {0}")]
    Lease(#[from] LeaseError),

    #[error("replay failed: {0}")]
    Replay(#[from] ReplayError),

    #[error("snapshot store error: {0}")]
    Snapshot(#[from] SnapshotStoreError),

    #[error("event log error: {0}")]
    Log(#[from] EventLogError),

    #[error("engine is shutting down")]
    ShuttingDown,
}

impl EngineError {
    /// Whether resubmitting the same request may succeed.
    ///
    /// A timed-out order is not retryable: it still completes, and its
    /// outcome arrives as a `LateResult` or `LateFailure` notification.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::QueueSaturated { .. }
                | EngineError::MarketBusy(_)
                | EngineError::StaleState { .. }
                | EngineError::Lease(LeaseError::Unavailable(_))
                | EngineError::Snapshot(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("processing failed: {0}")]
    Processing(#[from] EngineError),
}

impl CommandError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CommandError::Validation(_) => false,
            CommandError::Processing(e) => e.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let market = MarketKey::new(1, 1);
        assert!(EngineError::QueueSaturated { partition: 0 }.is_retryable());
        assert!(EngineError::MarketBusy(market).is_retryable());
        assert!(!EngineError::Timeout { order_id: 1 }.is_retryable());
        assert!(!EngineError::MarketSuspended { market, reason: "x".into() }.is_retryable());

        let validation: CommandError = ValidationError::InvalidQuantity.into();
        assert!(!validation.is_retryable());
        let busy: CommandError = EngineError::MarketBusy(market).into();
        assert!(busy.is_retryable());
    }
}
