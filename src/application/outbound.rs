/// Outbound Dispatcher - delivering engine notifications
///
/// Matching never waits on subscribers. The write path hands notifications
/// to a `Notifier`, which updates the local read model and queues them for
/// delivery. Each subscriber gets its own queue and task, so a slow
/// settlement consumer does not hold back the broadcast feed.
///
/// ## Delivery
/// - In order per subscriber
/// - At least once: failed deliveries are retried with exponential backoff
///   up to `max_attempts`, then counted and dropped
/// - Subscribers use `Deduplicator` to ignore redelivered notifications

use super::dto::EngineNotification;
use super::read_model::ReadModel;
use crate::domain::entities::MarketKey;
use crate::shared::metrics::METRICS;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("subscriber unavailable: {0}")]
    Unavailable(String),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, notification: &EngineNotification) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

struct SubscriberQueue {
    name: String,
    tx: mpsc::UnboundedSender<EngineNotification>,
}

pub struct OutboundDispatcher {
    queues: Mutex<Vec<SubscriberQueue>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl OutboundDispatcher {
    /// Spawns one delivery task per subscriber. Requires a Tokio runtime.
    pub fn start(subscribers: Vec<Arc<dyn EventSubscriber>>, config: DispatcherConfig) -> Self {
        let mut queues = Vec::with_capacity(subscribers.len());
        let mut workers = Vec::with_capacity(subscribers.len());

        for subscriber in subscribers {
            let (tx, rx) = mpsc::unbounded_channel();
            queues.push(SubscriberQueue {
                name: subscriber.name().to_string(),
                tx,
            });
            workers.push(tokio::spawn(run_subscriber(subscriber, rx, config.clone())));
        }

        Self {
            queues: Mutex::new(queues),
            workers: Mutex::new(workers),
        }
    }

    pub fn publish(&self, notification: EngineNotification) {
        let queues = self.queues.lock();
        for queue in queues.iter() {
            if queue.tx.send(notification.clone()).is_err() {
                tracing::warn!(subscriber = %queue.name, "subscriber queue closed, notification dropped");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.queues.lock().len()
    }

    /// Closes the queues and waits for pending deliveries to finish.
    pub async fn shutdown(&self) {
        self.queues.lock().clear();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "delivery task failed");
            }
        }
    }
}

async fn run_subscriber(
    subscriber: Arc<dyn EventSubscriber>,
    mut rx: mpsc::UnboundedReceiver<EngineNotification>,
    config: DispatcherConfig,
) {
    while let Some(notification) = rx.recv().await {
        deliver_with_retry(subscriber.as_ref(), &notification, &config).await;
    }
    tracing::debug!(subscriber = subscriber.name(), "delivery task stopped");
}

async fn deliver_with_retry(subscriber: &dyn EventSubscriber, notification: &EngineNotification, config: &DispatcherConfig) {
    let mut backoff = config.initial_backoff;
    for attempt in 1..=config.max_attempts.max(1) {
        match subscriber.deliver(notification).await {
            Ok(()) => return,
            Err(e) if attempt < config.max_attempts => {
                tracing::debug!(
                    subscriber = subscriber.name(),
                    kind = notification.kind(),
                    attempt,
                    error = %e,
                    "delivery failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.max_backoff);
            }
            Err(e) => {
                METRICS
                    .delivery_failures_total
                    .with_label_values(&[subscriber.name()])
                    .inc();
                tracing::error!(
                    subscriber = subscriber.name(),
                    kind = notification.kind(),
                    market = %notification.market(),
                    error = %e,
                    "notification dropped after retries"
                );
            }
        }
    }
}

/// Applies notifications to the read model, then queues them for delivery.
pub struct Notifier {
    read_model: Arc<ReadModel>,
    dispatcher: Arc<OutboundDispatcher>,
}

impl Notifier {
    pub fn new(read_model: Arc<ReadModel>, dispatcher: Arc<OutboundDispatcher>) -> Self {
        Self { read_model, dispatcher }
    }

    pub fn emit(&self, notification: EngineNotification) {
        self.read_model.apply(&notification);
        self.dispatcher.publish(notification);
    }

    pub fn read_model(&self) -> &Arc<ReadModel> {
        &self.read_model
    }
}

/// Tracks the highest sequence seen per market and notification kind.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: Mutex<HashMap<(MarketKey, &'static str), u64>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time a notification is seen.
    pub fn first_delivery(&self, notification: &EngineNotification) -> bool {
        let Some(sequence) = notification.sequence() else {
            return true;
        };
        let mut seen = self.seen.lock();
        let last = seen.entry((notification.market(), notification.kind())).or_insert(0);
        if sequence <= *last {
            return false;
        }
        *last = sequence;
        true
    }
}

/// Forwards notifications into a channel.
pub struct ChannelSubscriber {
    name: String,
    tx: mpsc::UnboundedSender<EngineNotification>,
}

impl ChannelSubscriber {
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<EngineNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { name: name.into(), tx }, rx)
    }
}

#[async_trait]
impl EventSubscriber for ChannelSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, notification: &EngineNotification) -> Result<(), DeliveryError> {
        self.tx
            .send(notification.clone())
            .map_err(|_| DeliveryError::Unavailable(format!("{} receiver dropped", self.name)))
    }
}

/// Logs every notification; stands in for a broadcast feed.
pub struct TracingSubscriber;

#[async_trait]
impl EventSubscriber for TracingSubscriber {
    fn name(&self) -> &str {
        "trace"
    }

    async fn deliver(&self, notification: &EngineNotification) -> Result<(), DeliveryError> {
        match notification {
            EngineNotification::TradeExecuted { trade, .. } => tracing::info!(
                trade_id = %trade.id,
                price = %trade.price,
                quantity = trade.quantity,
                "trade executed"
            ),
            EngineNotification::MarketSuspended { market, reason } => {
                tracing::warn!(market = %market, reason = %reason, "market suspended")
            }
            EngineNotification::LateFailure { order_id, market, reason, .. } => {
                tracing::warn!(order_id, market = %market, reason = %reason, "order failed after its deadline")
            }
            other => tracing::debug!(kind = other.kind(), market = %other.market(), "notification"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const MARKET: MarketKey = MarketKey::new(1, 4);

    fn suspended() -> EngineNotification {
        EngineNotification::MarketSuspended {
            market: MARKET,
            reason: "test".into(),
        }
    }

    fn book_changed(sequence: u64) -> EngineNotification {
        EngineNotification::OrderBookChanged {
            market: MARKET,
            sequence,
            best_bid: None,
            best_ask: None,
            last_price: None,
            total_volume: 0,
            depth: Default::default(),
        }
    }

    struct Flaky {
        failures_left: AtomicU32,
        delivered: mpsc::UnboundedSender<EngineNotification>,
    }

    #[async_trait]
    impl EventSubscriber for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn deliver(&self, notification: &EngineNotification) -> Result<(), DeliveryError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(DeliveryError::Unavailable("down".into()));
            }
            let _ = self.delivered.send(notification.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retry_until_delivered() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let flaky: Arc<dyn EventSubscriber> = Arc::new(Flaky {
            failures_left: AtomicU32::new(2),
            delivered: tx,
        });
        let config = DispatcherConfig {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        };
        let subscribers: Vec<Arc<dyn EventSubscriber>> = vec![flaky];
        let dispatcher = OutboundDispatcher::start(subscribers, config);
        dispatcher.publish(suspended());
        dispatcher.publish(book_changed(1));

        assert_eq!(rx.recv().await, Some(suspended()));
        assert_eq!(rx.recv().await, Some(book_changed(1)));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let (a, mut rx_a) = ChannelSubscriber::new("a");
        let (b, mut rx_b) = ChannelSubscriber::new("b");
        let a: Arc<dyn EventSubscriber> = Arc::new(a);
        let b: Arc<dyn EventSubscriber> = Arc::new(b);
        let subscribers = vec![a, b];
        let dispatcher = OutboundDispatcher::start(subscribers, DispatcherConfig::default());
        assert_eq!(dispatcher.subscriber_count(), 2);

        dispatcher.publish(book_changed(7));
        assert_eq!(rx_a.recv().await, Some(book_changed(7)));
        assert_eq!(rx_b.recv().await, Some(book_changed(7)));
    }

    #[test]
    fn test_deduplicator() {
        let dedupe = Deduplicator::new();
        assert!(dedupe.first_delivery(&book_changed(1)));
        assert!(!dedupe.first_delivery(&book_changed(1)));
        assert!(dedupe.first_delivery(&book_changed(2)));
        assert!(dedupe.first_delivery(&suspended()));
        assert!(dedupe.first_delivery(&suspended()));
    }
}
