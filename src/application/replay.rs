/// Replay - rebuilding books from the event log
///
/// A market's book is a pure function of its event history. `apply_event`
/// folds one event into a `MarketState`; events at or below the state's
/// `last_sequence` are skipped, so replaying the same range twice is
/// harmless. A missing sequence stops the replay with `SequenceGap`.
///
/// `Replayer::rebuild` starts from the newest shared snapshot when one is
/// available and then reads the log from the snapshot's sequence onward.

use super::errors::ReplayError;
use super::registry::MarketState;
use crate::domain::entities::MarketKey;
use crate::domain::events::{EventKind, MarketEvent};
use crate::domain::orderbook::{OrderBook, PriceTimeOrderBook};
use crate::infrastructure::event_log::EventLog;
use crate::infrastructure::snapshot_store::SharedBookStore;
use std::sync::Arc;

/// Applies one event. Returns `false` when it had already been applied.
pub fn apply_event(state: &mut MarketState, event: &MarketEvent) -> Result<bool, ReplayError> {
    let market = state.market;
    if event.sequence <= state.last_sequence {
        return Ok(false);
    }
    let expected = state.last_sequence + 1;
    if event.sequence != expected {
        return Err(ReplayError::SequenceGap {
            market,
            expected,
            found: event.sequence,
        });
    }
    let inconsistent = |reason: String| ReplayError::Inconsistent {
        market,
        sequence: event.sequence,
        reason,
    };

    match &event.kind {
        EventKind::OrderSubmitted { order } => {
            if state.book.get(order.id).is_some() {
                return Err(inconsistent(format!("order {} submitted twice", order.id)));
            }
            state.book.insert(order.clone());
        }
        EventKind::TradeExecuted { trade } => {
            for order_id in [trade.buy_order_id, trade.sell_order_id] {
                let remaining = state.book.get(order_id).map(|o| o.remaining);
                match remaining {
                    Some(r) if r >= trade.quantity => {}
                    Some(r) => {
                        return Err(inconsistent(format!(
                            "trade of {} exceeds remaining {} of order {}",
                            trade.quantity, r, order_id
                        )))
                    }
                    None => return Err(inconsistent(format!("trade references unknown order {order_id}"))),
                }
            }
            state.book.reduce(trade.buy_order_id, trade.quantity);
            state.book.reduce(trade.sell_order_id, trade.quantity);
            state.book.record_trade(trade.price, trade.quantity);
            state.volume.record(trade.executed_at, trade.quantity);
        }
        EventKind::OrderCancelled { order_id, .. } => {
            if state.book.remove(*order_id).is_none() {
                return Err(inconsistent(format!("cancel of unknown order {order_id}")));
            }
        }
    }

    state.last_sequence = event.sequence;
    state.last_timestamp = state.last_timestamp.max(event.timestamp);
    Ok(true)
}

pub struct Replayer {
    log: Arc<dyn EventLog>,
    snapshots: Option<Arc<dyn SharedBookStore>>,
}

impl Replayer {
    pub fn new(log: Arc<dyn EventLog>, snapshots: Option<Arc<dyn SharedBookStore>>) -> Self {
        Self { log, snapshots }
    }

    /// Builds the market's state from scratch.
    pub async fn rebuild(&self, market: MarketKey) -> Result<MarketState, ReplayError> {
        let mut state = MarketState::new(market);

        if let Some(store) = &self.snapshots {
            match store.get(market).await {
                Ok(Some(snapshot)) => {
                    state.book = PriceTimeOrderBook::from_snapshot(&snapshot);
                    state.last_sequence = snapshot.sequence;
                    state.last_timestamp = snapshot
                        .orders
                        .iter()
                        .map(|o| o.submitted_at)
                        .max()
                        .unwrap_or(0)
                        .max(snapshot.published_at);
                    // 快照之前的成交只剩汇总值，按发布时间计入窗口
                    if snapshot.volume_24h > 0 {
                        state.volume.record(snapshot.published_at, snapshot.volume_24h);
                    }
                    tracing::debug!(market = %market, sequence = snapshot.sequence, "restored book from snapshot");
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(market = %market, error = %e, "snapshot unavailable, replaying full log");
                }
            }
        }

        let applied = self.catch_up(&mut state).await?;
        state.loaded = true;
        tracing::info!(
            market = %market,
            sequence = state.last_sequence,
            replayed = applied.len(),
            resting = state.book.len(),
            "market rebuilt"
        );
        Ok(state)
    }

    /// Applies every logged event newer than the state. Returns the events applied.
    pub async fn catch_up(&self, state: &mut MarketState) -> Result<Vec<MarketEvent>, ReplayError> {
        let events = self.log.read_from(state.market, state.last_sequence + 1).await?;
        let mut applied = Vec::with_capacity(events.len());
        for event in events {
            if apply_event(state, &event)? {
                applied.push(event);
            }
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Order, Side, Trade, TradeId};
    use crate::domain::price::Price;
    use crate::infrastructure::event_log::InMemoryEventLog;

    const MARKET: MarketKey = MarketKey::new(6, 1);

    fn event(sequence: u64, kind: EventKind) -> MarketEvent {
        MarketEvent {
            sequence,
            market: MARKET,
            instance_id: "test".into(),
            timestamp: sequence,
            kind,
        }
    }

    fn order(id: u64, side: Side, ticks: u64, qty: u64) -> Order {
        Order::new(id, MARKET, id * 10, side, Price::from_ticks(ticks), qty, id)
    }

    /// buy 5@0.50, buy 5@0.50, sell 7@0.45 crossing both
    fn history() -> Vec<MarketEvent> {
        let b1 = order(1, Side::Buy, 5_000, 5);
        let b2 = order(2, Side::Buy, 5_000, 5);
        let s3 = order(3, Side::Sell, 4_500, 7);
        let t1 = Trade::between(TradeId { market: MARKET, sequence: 4 }, &s3, &b1, 5, 3);
        let t2 = Trade::between(TradeId { market: MARKET, sequence: 5 }, &s3, &b2, 2, 3);
        vec![
            event(1, EventKind::OrderSubmitted { order: b1 }),
            event(2, EventKind::OrderSubmitted { order: b2 }),
            event(3, EventKind::OrderSubmitted { order: s3 }),
            event(4, EventKind::TradeExecuted { trade: t1 }),
            event(5, EventKind::TradeExecuted { trade: t2 }),
        ]
    }

    #[test]
    fn test_replay_rebuilds_book() {
        let mut state = MarketState::new(MARKET);
        for e in history() {
            assert!(apply_event(&mut state, &e).unwrap());
        }
        assert_eq!(state.last_sequence, 5);
        assert_eq!(state.book.len(), 1);
        assert_eq!(state.book.get(2).map(|o| o.remaining), Some(3));
        assert_eq!(state.book.total_volume(), 7);
        assert_eq!(state.book.last_trade_price(), Some(Price::from_ticks(5_000)));
    }

    #[test]
    fn test_replay_is_idempotent() {
        let mut once = MarketState::new(MARKET);
        for e in history() {
            apply_event(&mut once, &e).unwrap();
        }
        let mut twice = once.clone();
        for e in history() {
            assert!(!apply_event(&mut twice, &e).unwrap());
        }
        assert_eq!(once.book, twice.book);
        assert_eq!(once.last_sequence, twice.last_sequence);
    }

    #[test]
    fn test_gap_detected() {
        let mut state = MarketState::new(MARKET);
        let events = history();
        apply_event(&mut state, &events[0]).unwrap();
        let err = apply_event(&mut state, &events[2]).unwrap_err();
        assert!(matches!(err, ReplayError::SequenceGap { expected: 2, found: 3, .. }));
    }

    #[test]
    fn test_overfill_is_inconsistent() {
        let mut state = MarketState::new(MARKET);
        let b1 = order(1, Side::Buy, 5_000, 1);
        let s2 = order(2, Side::Sell, 5_000, 5);
        let trade = Trade::between(TradeId { market: MARKET, sequence: 3 }, &s2, &b1, 5, 3);
        apply_event(&mut state, &event(1, EventKind::OrderSubmitted { order: b1 })).unwrap();
        apply_event(&mut state, &event(2, EventKind::OrderSubmitted { order: s2 })).unwrap();
        let err = apply_event(&mut state, &event(3, EventKind::TradeExecuted { trade })).unwrap_err();
        assert!(matches!(err, ReplayError::Inconsistent { sequence: 3, .. }));
    }

    #[tokio::test]
    async fn test_rebuild_from_log() {
        let log = Arc::new(InMemoryEventLog::new());
        log.append(MARKET, &history()).await.unwrap();
        let replayer = Replayer::new(log.clone(), None);

        let state = replayer.rebuild(MARKET).await.unwrap();
        assert!(state.loaded);
        assert_eq!(state.last_sequence, 5);
        assert_eq!(state.book.best_bid(), Some(Price::from_ticks(5_000)));
    }
}
