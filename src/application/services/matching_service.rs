/// Matching Service - partitioned single-process matching core
///
/// Orders are routed to a fixed pool of Tokio worker tasks by a hash of
/// their market, so every order for a market lands on the same worker and
/// keeps its arrival order, while different markets run in parallel.
///
/// ## Architecture
/// - **Partitioning**: `hash(market) % partition_count` picks the worker
/// - **Back-pressure**: bounded queue per worker, `try_send` fails fast with
///   `QueueSaturated` instead of queueing without limit
/// - **Per-market exclusion**: the worker locks the market's slot in the
///   `BookRegistry` before matching; cancellations take the same lock
///   directly, without going through the queue
/// - **Deadlines**: a caller that stops waiting gets `Timeout`; the order
///   still completes and its result goes out as `LateResult`
///
/// ## Usage
/// ```rust,ignore
/// let service = MatchingService::start(PartitionConfig::default(), match_uc, cancel_uc, ctx, ids);
/// let outcome = service.submit(order, Duration::from_secs(30)).await?;
/// ```

use crate::application::dto::{CancelOutcome, EngineNotification, MatchOutcome};
use crate::application::errors::EngineError;
use crate::application::use_cases::{CancelOrderUseCase, ExecutionContext, MatchOrderUseCase};
use crate::domain::entities::{MarketKey, OrderId};
use crate::domain::validation::ValidatedCancel;
use crate::shared::ids::IdGenerator;
use crate::shared::metrics::METRICS;
use crate::shared::protocol::ValidatedOrder;
use crate::shared::throttle::WarnLimiter;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Configuration for the partitioned service
#[derive(Clone, Debug)]
pub struct PartitionConfig {
    /// Number of worker tasks (recommended: number of CPU cores)
    pub partition_count: usize,

    /// Queue capacity per partition
    pub queue_capacity: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            partition_count: num_cpus::get(),
            queue_capacity: 1024,
        }
    }
}

type Reply = oneshot::Sender<Result<MatchOutcome, EngineError>>;

struct Submission {
    order: ValidatedOrder,
    order_id: OrderId,
    reply: Reply,
}

/// Hands a result to the waiting caller, or publishes it as late.
///
/// Failures are published too: a caller that saw `Timeout` learns the
/// outcome either way.
pub(crate) fn deliver_result(
    ctx: &ExecutionContext,
    order_id: OrderId,
    market: MarketKey,
    reply: Reply,
    result: Result<MatchOutcome, EngineError>,
) {
    let Err(result) = reply.send(result) else {
        return;
    };
    METRICS
        .late_results_total
        .with_label_values(&[&market.to_string()])
        .inc();
    match result {
        Ok(outcome) => {
            tracing::info!(order_id, market = %market, "delivering late result");
            ctx.notifier.emit(EngineNotification::LateResult { outcome });
        }
        Err(e) => {
            tracing::warn!(order_id, market = %market, error = %e, "delivering late failure");
            ctx.notifier.emit(EngineNotification::LateFailure {
                order_id,
                market,
                reason: e.to_string(),
                retryable: e.is_retryable(),
            });
        }
    }
}

pub struct MatchingService {
    partitions: Vec<mpsc::Sender<Submission>>,
    ctx: Arc<ExecutionContext>,
    cancel_uc: Arc<CancelOrderUseCase>,
    ids: Arc<IdGenerator>,
    warnings: WarnLimiter<MarketKey>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl MatchingService {
    /// Spawns the worker tasks. Requires a Tokio runtime.
    pub fn start(
        config: PartitionConfig,
        ctx: Arc<ExecutionContext>,
        match_uc: Arc<MatchOrderUseCase>,
        cancel_uc: Arc<CancelOrderUseCase>,
        ids: Arc<IdGenerator>,
    ) -> Self {
        let partition_count = config.partition_count.max(1);
        let mut partitions = Vec::with_capacity(partition_count);
        let mut workers = Vec::with_capacity(partition_count);

        for partition in 0..partition_count {
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
            partitions.push(tx);
            workers.push(tokio::spawn(run_worker(partition, rx, ctx.clone(), match_uc.clone())));
        }
        tracing::info!(partitions = partition_count, queue_capacity = config.queue_capacity, "matching workers started");

        Self {
            partitions,
            ctx,
            cancel_uc,
            ids,
            warnings: WarnLimiter::default(),
            workers: Mutex::new(workers),
        }
    }

    /// Routes a market to its partition
    #[inline]
    pub fn route_to_partition(&self, market: MarketKey) -> usize {
        let mut hasher = DefaultHasher::new();
        market.hash(&mut hasher);
        (hasher.finish() as usize) % self.partitions.len()
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Queues an order and waits up to `deadline` for its outcome.
    pub async fn submit(&self, order: ValidatedOrder, deadline: Duration) -> Result<MatchOutcome, EngineError> {
        let partition = self.route_to_partition(order.market);
        let order_id = self.ids.next_id();
        let (reply, response) = oneshot::channel();
        let sender = &self.partitions[partition];

        match sender.try_send(Submission { order, order_id, reply }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                METRICS
                    .queue_saturated_total
                    .with_label_values(&[&partition.to_string()])
                    .inc();
                if let Some(suppressed) = self.warnings.check(order.market) {
                    tracing::warn!(market = %order.market, partition, suppressed, "submission queue saturated");
                }
                return Err(EngineError::QueueSaturated { partition });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(EngineError::ShuttingDown),
        }
        METRICS
            .partition_queue_depth
            .with_label_values(&[&partition.to_string()])
            .set((sender.max_capacity() - sender.capacity()) as f64);

        match tokio::time::timeout(deadline, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::ShuttingDown),
            Err(_) => {
                tracing::warn!(market = %order.market, order_id, ?deadline, "order missed its deadline");
                Err(EngineError::Timeout { order_id })
            }
        }
    }

    /// Cancels under the market's mutex, bypassing the queue.
    pub async fn cancel(&self, request: ValidatedCancel) -> Result<CancelOutcome, EngineError> {
        let slot = self.ctx.registry.slot(request.market);
        let mut state = slot.state.lock().await;
        self.ctx.ensure_loaded(&mut state).await?;
        self.cancel_uc.execute(&mut state, request).await
    }

    /// Stops the workers. Callers still waiting see `ShuttingDown`.
    pub async fn shutdown(&self) {
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            worker.abort();
            let _ = worker.await;
        }
    }
}

async fn run_worker(
    partition: usize,
    mut rx: mpsc::Receiver<Submission>,
    ctx: Arc<ExecutionContext>,
    match_uc: Arc<MatchOrderUseCase>,
) {
    while let Some(submission) = rx.recv().await {
        let market = submission.order.market;
        let slot = ctx.registry.slot(market);
        let result = {
            let mut state = slot.state.lock().await;
            match ctx.ensure_loaded(&mut state).await {
                Ok(()) => {
                    match_uc
                        .execute(&mut state, submission.order, submission.order_id)
                        .await
                }
                Err(e) => Err(e),
            }
        };
        deliver_result(&ctx, submission.order_id, market, submission.reply, result);
    }
    tracing::debug!(partition, "matching worker stopped");
}
