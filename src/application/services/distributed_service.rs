/// Distributed Coordinator - writes to markets shared between instances
///
/// For markets configured as multi-instance, the per-market mutex only
/// serialises writers inside this process. Across processes a market is
/// written only while holding its lease:
///
/// 1. Take the local market mutex
/// 2. Acquire the lease (bounded retries with jittered backoff, then
///    `MarketBusy`)
/// 3. Catch the local book up from the event log; the previous holder may
///    have been another instance
/// 4. Renew the lease if less than half its TTL is left
/// 5. Match and append
/// 6. Publish a `BookSnapshot` tagged with the last sequence
/// 7. Release the lease
///
/// Even if a lease expires mid-operation, the event log's contiguity check
/// rejects a stale writer's batch, so two writers can never both append the
/// same sequence.

use super::matching_service::deliver_result;
use crate::application::dto::{CancelOutcome, MatchOutcome};
use crate::application::errors::EngineError;
use crate::application::registry::MarketState;
use crate::application::use_cases::{CancelOrderUseCase, ExecutionContext, MatchOrderUseCase};
use crate::domain::entities::{MarketKey, OrderId};
use crate::domain::orderbook::BookSnapshot;
use crate::domain::validation::ValidatedCancel;
use crate::infrastructure::lease::{Lease, LeaseStore};
use crate::infrastructure::snapshot_store::SharedBookStore;
use crate::shared::ids::IdGenerator;
use crate::shared::metrics::METRICS;
use crate::shared::protocol::ValidatedOrder;
use crate::shared::throttle::WarnLimiter;
use crate::shared::timestamp::now_nanos;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

const MAX_LEASE_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub lease_ttl: Duration,
    /// Attempts after the first one before giving up with `MarketBusy`.
    pub lease_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(5),
            lease_retries: 3,
            retry_backoff: Duration::from_millis(20),
        }
    }
}

struct Inner {
    config: CoordinatorConfig,
    ctx: Arc<ExecutionContext>,
    leases: Arc<dyn LeaseStore>,
    snapshots: Arc<dyn SharedBookStore>,
    match_uc: Arc<MatchOrderUseCase>,
    cancel_uc: Arc<CancelOrderUseCase>,
    warnings: WarnLimiter<MarketKey>,
}

#[derive(Clone)]
pub struct DistributedCoordinator {
    inner: Arc<Inner>,
    ids: Arc<IdGenerator>,
}

impl DistributedCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        ctx: Arc<ExecutionContext>,
        leases: Arc<dyn LeaseStore>,
        snapshots: Arc<dyn SharedBookStore>,
        match_uc: Arc<MatchOrderUseCase>,
        cancel_uc: Arc<CancelOrderUseCase>,
        ids: Arc<IdGenerator>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                ctx,
                leases,
                snapshots,
                match_uc,
                cancel_uc,
                warnings: WarnLimiter::default(),
            }),
            ids,
        }
    }

    /// Matches an order under the market's lease.
    ///
    /// The work runs in its own task, so a caller that gives up at the
    /// deadline does not abandon an operation holding the lease.
    pub async fn submit(&self, order: ValidatedOrder, deadline: Duration) -> Result<MatchOutcome, EngineError> {
        let order_id = self.ids.next_id();
        let market = order.market;
        let (reply, response) = oneshot::channel();
        let inner = self.inner.clone();

        tokio::spawn(async move {
            let result = inner.submit_locked(order, order_id).await;
            deliver_result(&inner.ctx, order_id, market, reply, result);
        });

        match tokio::time::timeout(deadline, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::ShuttingDown),
            Err(_) => {
                tracing::warn!(market = %market, order_id, ?deadline, "order missed its deadline");
                Err(EngineError::Timeout { order_id })
            }
        }
    }

    pub async fn cancel(&self, request: ValidatedCancel) -> Result<CancelOutcome, EngineError> {
        self.inner.cancel_locked(request).await
    }

    /// Current lease holder of `market`, if any.
    pub async fn lease_holder(&self, market: MarketKey) -> Result<Option<String>, EngineError> {
        Ok(self.inner.leases.holder(market).await?.map(|l| l.holder))
    }
}

impl Inner {
    async fn submit_locked(&self, order: ValidatedOrder, order_id: OrderId) -> Result<MatchOutcome, EngineError> {
        let slot = self.ctx.registry.slot(order.market);
        let mut state = slot.state.lock().await;
        state.ensure_active()?;

        let lease = self.acquire(order.market).await?;
        let result = async {
            let lease = self.prepare(&mut state, lease.clone()).await?;
            let outcome = self.match_uc.execute(&mut state, order, order_id).await?;
            self.publish_snapshot(&state).await;
            Ok::<_, EngineError>((outcome, lease))
        }
        .await;

        match result {
            Ok((outcome, renewed)) => {
                self.release(&renewed).await;
                Ok(outcome)
            }
            Err(e) => {
                self.release(&lease).await;
                Err(e)
            }
        }
    }

    async fn cancel_locked(&self, request: ValidatedCancel) -> Result<CancelOutcome, EngineError> {
        let slot = self.ctx.registry.slot(request.market);
        let mut state = slot.state.lock().await;
        state.ensure_active()?;

        let lease = self.acquire(request.market).await?;
        let result = async {
            let lease = self.prepare(&mut state, lease.clone()).await?;
            let outcome = self.cancel_uc.execute(&mut state, request).await?;
            self.publish_snapshot(&state).await;
            Ok::<_, EngineError>((outcome, lease))
        }
        .await;

        match result {
            Ok((outcome, renewed)) => {
                self.release(&renewed).await;
                Ok(outcome)
            }
            Err(e) => {
                self.release(&lease).await;
                Err(e)
            }
        }
    }

    /// Brings the book up to date and makes sure enough lease time is left.
    async fn prepare(&self, state: &mut MarketState, lease: Lease) -> Result<Lease, EngineError> {
        self.ctx.sync_with_log(state).await?;
        if lease.remaining(Instant::now()) < self.config.lease_ttl / 2 {
            return Ok(self.leases.renew(&lease, self.config.lease_ttl).await?);
        }
        Ok(lease)
    }

    async fn acquire(&self, market: MarketKey) -> Result<Lease, EngineError> {
        let holder = self.ctx.instance_id.as_ref();
        let mut backoff = self.config.retry_backoff;

        for attempt in 0..=self.config.lease_retries {
            if let Some(lease) = self.leases.try_acquire(market, holder, self.config.lease_ttl).await? {
                tracing::trace!(market = %market, token = lease.token, attempt, "lease acquired");
                return Ok(lease);
            }
            if attempt < self.config.lease_retries {
                let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64);
                tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
                backoff = (backoff * 2).min(MAX_LEASE_BACKOFF);
            }
        }

        METRICS
            .lease_contention_total
            .with_label_values(&[&market.to_string()])
            .inc();
        if let Some(suppressed) = self.warnings.check(market) {
            tracing::warn!(market = %market, suppressed, "market busy on another instance");
        }
        Err(EngineError::MarketBusy(market))
    }

    async fn release(&self, lease: &Lease) {
        match self.leases.release(lease).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(market = %lease.market, token = lease.token, "lease expired before release"),
            Err(e) => tracing::warn!(market = %lease.market, error = %e, "failed to release lease"),
        }
    }

    /// Publishes the book for readers and the next writer. Failure only delays them.
    async fn publish_snapshot(&self, state: &MarketState) {
        let snapshot = BookSnapshot::capture(
            &state.book,
            state.last_sequence,
            self.ctx.depth_levels,
            state.volume.volume_24h(),
            now_nanos(),
        );
        if let Err(e) = self.snapshots.put(snapshot).await {
            tracing::warn!(market = %state.market, sequence = state.last_sequence, error = %e, "snapshot publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::context::test_support::test_context;
    use crate::application::dto::EngineNotification;
    use crate::domain::entities::{Order, Side, Trade, TradeId};
    use crate::domain::events::{EventKind, MarketEvent};
    use crate::domain::price::Price;
    use crate::infrastructure::event_log::EventLog;
    use crate::infrastructure::lease::InMemoryLeaseStore;
    use crate::infrastructure::snapshot_store::InMemorySnapshotStore;

    const MARKET: MarketKey = MarketKey::new(40, 1);

    fn coordinator(
        ctx: Arc<ExecutionContext>,
        leases: Arc<InMemoryLeaseStore>,
        snapshots: Arc<InMemorySnapshotStore>,
    ) -> DistributedCoordinator {
        DistributedCoordinator::new(
            CoordinatorConfig {
                lease_ttl: Duration::from_secs(2),
                lease_retries: 2,
                retry_backoff: Duration::from_millis(5),
            },
            ctx.clone(),
            leases,
            snapshots,
            Arc::new(MatchOrderUseCase::new(ctx.clone())),
            Arc::new(CancelOrderUseCase::new(ctx)),
            Arc::new(IdGenerator::with_seed("test", 0)),
        )
    }

    fn order(side: Side, ticks: u64) -> ValidatedOrder {
        ValidatedOrder {
            market: MARKET,
            account_id: 1,
            side,
            price: Price::from_ticks(ticks),
            quantity: 5,
        }
    }

    #[tokio::test]
    async fn test_submit_publishes_snapshot_and_releases() {
        let t = test_context();
        let leases = Arc::new(InMemoryLeaseStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let coordinator = coordinator(t.ctx.clone(), leases.clone(), snapshots.clone());

        let outcome = coordinator
            .submit(order(Side::Buy, 4_000), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.sequence, 1);

        let snapshot = snapshots.get(MARKET).await.unwrap().unwrap();
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(snapshot.best_bid, Some(Price::from_ticks(4_000)));
        assert!(leases.holder(MARKET).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_busy_market() {
        let t = test_context();
        let leases = Arc::new(InMemoryLeaseStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let coordinator = coordinator(t.ctx.clone(), leases.clone(), snapshots);

        let foreign = leases
            .try_acquire(MARKET, "other-instance", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();
        let err = coordinator
            .submit(order(Side::Buy, 4_000), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MarketBusy(m) if m == MARKET));
        assert!(err.is_retryable());
        assert_eq!(t.log.len(MARKET), 0);

        leases.release(&foreign).await.unwrap();
        assert!(coordinator.submit(order(Side::Buy, 4_000), Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_snapshot_failure_is_not_fatal() {
        let t = test_context();
        let leases = Arc::new(InMemoryLeaseStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        snapshots.set_unavailable(true);
        let coordinator = coordinator(t.ctx.clone(), leases, snapshots);

        assert!(coordinator
            .submit(order(Side::Sell, 6_000), Duration::from_secs(5))
            .await
            .is_ok());
        assert_eq!(t.log.len(MARKET), 1);
    }

    #[tokio::test]
    async fn test_late_failure_is_published() {
        let mut t = test_context();
        let leases = Arc::new(InMemoryLeaseStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let coordinator = coordinator(t.ctx.clone(), leases.clone(), snapshots);

        let _foreign = leases
            .try_acquire(MARKET, "other-instance", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();
        let err = coordinator
            .submit(order(Side::Buy, 4_000), Duration::from_millis(1))
            .await
            .unwrap_err();
        let EngineError::Timeout { order_id } = err else {
            panic!("expected timeout, got {err:?}");
        };
        assert!(!err.is_retryable());

        let notification = tokio::time::timeout(Duration::from_secs(2), t.notifications.recv())
            .await
            .unwrap()
            .unwrap();
        match notification {
            EngineNotification::LateFailure { order_id: id, market, reason, retryable } => {
                assert_eq!(id, order_id);
                assert_eq!(market, MARKET);
                assert!(reason.contains("another instance"), "{reason}");
                assert!(retryable);
            }
            other => panic!("expected late failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_snapshot_volume_counts_caught_up_trades() {
        let t = test_context();
        let leases = Arc::new(InMemoryLeaseStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let coordinator = coordinator(t.ctx.clone(), leases, snapshots.clone());

        // 另一实例成交5，留下卖单剩余3
        let maker = Order::new(900, MARKET, 9, Side::Buy, Price::from_ticks(4_000), 5, 1);
        let taker = Order::new(901, MARKET, 8, Side::Sell, Price::from_ticks(4_000), 8, 2);
        let trade = Trade::between(TradeId { market: MARKET, sequence: 3 }, &taker, &maker, 5, now_nanos());
        let event = |sequence, kind| MarketEvent {
            sequence,
            market: MARKET,
            instance_id: "other-instance".into(),
            timestamp: sequence,
            kind,
        };
        t.log
            .append(
                MARKET,
                &[
                    event(1, EventKind::OrderSubmitted { order: maker }),
                    event(2, EventKind::OrderSubmitted { order: taker }),
                    event(3, EventKind::TradeExecuted { trade }),
                ],
            )
            .await
            .unwrap();

        let outcome = coordinator
            .submit(order(Side::Buy, 4_000), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].quantity, 3);

        let snapshot = snapshots.get(MARKET).await.unwrap().unwrap();
        assert_eq!(snapshot.total_volume, 8);
        assert_eq!(snapshot.volume_24h, 8);
    }
}
