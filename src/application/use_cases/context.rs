/// Execution context shared by the write-path use cases
///
/// Holds what a use case needs besides the locked `MarketState`: the event
/// log, the replayer, the registry (for suspension bookkeeping) and the
/// notifier. All methods expect the caller to hold the market's mutex.

use crate::application::dto::EngineNotification;
use crate::application::errors::EngineError;
use crate::application::outbound::Notifier;
use crate::application::registry::{BookRegistry, MarketState};
use crate::application::replay::Replayer;
use crate::domain::events::MarketEvent;
use crate::domain::orderbook::OrderBook;
use crate::infrastructure::event_log::{EventLog, EventLogError};
use crate::shared::metrics::METRICS;
use std::sync::Arc;
use std::time::Duration;

pub struct ExecutionContext {
    pub instance_id: Arc<str>,
    pub log: Arc<dyn EventLog>,
    pub replayer: Replayer,
    pub registry: Arc<BookRegistry>,
    pub notifier: Arc<Notifier>,
    pub append_timeout: Duration,
    pub depth_levels: usize,
}

impl ExecutionContext {
    /// Rebuilds the book from durable state if it has not been loaded yet.
    pub async fn ensure_loaded(&self, state: &mut MarketState) -> Result<(), EngineError> {
        if state.loaded {
            return Ok(());
        }
        state.ensure_active()?;
        match self.replayer.rebuild(state.market).await {
            Ok(fresh) => {
                *state = fresh;
                Ok(())
            }
            Err(e) => {
                self.suspend(state, &format!("replay failed: {e}"));
                Err(e.into())
            }
        }
    }

    /// Loads the book, or applies whatever other writers appended since.
    pub async fn sync_with_log(&self, state: &mut MarketState) -> Result<(), EngineError> {
        if !state.loaded {
            return self.ensure_loaded(state).await;
        }
        state.ensure_active()?;
        match self.replayer.catch_up(state).await {
            Ok(applied) => {
                if !applied.is_empty() {
                    tracing::debug!(market = %state.market, applied = applied.len(), "caught up from event log");
                }
                Ok(())
            }
            Err(e) => {
                self.suspend(state, &format!("catch-up failed: {e}"));
                Err(e.into())
            }
        }
    }

    /// Appends `events` and advances `last_sequence`.
    ///
    /// The book has already been mutated when this runs. On a sequence
    /// conflict the state is marked for rebuild; on any other failure the
    /// market is suspended until it is resynchronised.
    pub async fn persist(&self, state: &mut MarketState, events: Vec<MarketEvent>) -> Result<u64, EngineError> {
        let market = state.market;
        let log = self.log.clone();
        // 在独立任务中写入：超时后写入仍会完成，不会留下半截批次
        let write = tokio::spawn(async move { log.append(market, &events).await });

        let outcome = match tokio::time::timeout(self.append_timeout, write).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(EventLogError::Unavailable(format!("append task failed: {join}"))),
            Err(_) => Err(EventLogError::Unavailable(format!(
                "append timed out after {:?}",
                self.append_timeout
            ))),
        };

        match outcome {
            Ok(last) => {
                state.last_sequence = last;
                Ok(last)
            }
            Err(EventLogError::SequenceConflict { expected, got, .. }) => {
                tracing::warn!(market = %market, expected, got, "event log moved ahead of local book");
                state.loaded = false;
                Err(EngineError::StaleState { market })
            }
            Err(source) => {
                METRICS
                    .durability_failures_total
                    .with_label_values(&[&market.to_string()])
                    .inc();
                self.suspend(state, &format!("event log append failed: {source}"));
                Err(EngineError::Durability { market, source })
            }
        }
    }

    pub fn suspend(&self, state: &mut MarketState, reason: &str) {
        tracing::error!(market = %state.market, reason, "suspending market");
        state.suspended = Some(reason.to_string());
        self.registry.mark_suspended(state.market, reason);
        self.notifier.emit(EngineNotification::MarketSuspended {
            market: state.market,
            reason: reason.to_string(),
        });
    }

    pub fn book_changed(&self, state: &MarketState) -> EngineNotification {
        EngineNotification::OrderBookChanged {
            market: state.market,
            sequence: state.last_sequence,
            best_bid: state.book.best_bid(),
            best_ask: state.book.best_ask(),
            last_price: state.book.last_trade_price(),
            total_volume: state.book.total_volume(),
            depth: state.book.depth(self.depth_levels),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::application::outbound::{ChannelSubscriber, DispatcherConfig, EventSubscriber, OutboundDispatcher};
    use crate::application::read_model::ReadModel;
    use crate::infrastructure::event_log::InMemoryEventLog;
    use tokio::sync::mpsc;

    pub struct TestContext {
        pub ctx: Arc<ExecutionContext>,
        pub log: Arc<InMemoryEventLog>,
        pub notifications: mpsc::UnboundedReceiver<EngineNotification>,
    }

    /// Context over an in-memory log. Must be created inside a Tokio runtime.
    pub fn test_context() -> TestContext {
        let log = Arc::new(InMemoryEventLog::new());
        let (subscriber, notifications) = ChannelSubscriber::new("test");
        let subscriber: Arc<dyn EventSubscriber> = Arc::new(subscriber);
        let dispatcher = Arc::new(OutboundDispatcher::start(vec![subscriber], DispatcherConfig::default()));
        let notifier = Arc::new(Notifier::new(Arc::new(ReadModel::default()), dispatcher));
        let ctx = ExecutionContext {
            instance_id: Arc::from("test-instance"),
            log: log.clone(),
            replayer: Replayer::new(log.clone(), None),
            registry: Arc::new(BookRegistry::new()),
            notifier,
            append_timeout: Duration::from_millis(200),
            depth_levels: 10,
        };
        TestContext {
            ctx: Arc::new(ctx),
            log,
            notifications,
        }
    }
}
