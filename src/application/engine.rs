/// Engine - wiring and public facade
///
/// `Engine::start` assembles the application layer around injected
/// infrastructure (event log, lease store, snapshot store, subscribers):
///
/// ```text
///              ┌──────────────┐   local markets   ┌──────────────────┐
///  commands ──▶│CommandHandler├──────────────────▶│ MatchingService  │
///              └──────┬───────┘                   │ (N partitions)   │
///                     │ multi-instance            └────────┬─────────┘
///                     ▼                                    │
///          ┌──────────────────────┐                        ▼
///          │DistributedCoordinator├──▶ use cases ──▶ EventLog (durable)
///          └──────────────────────┘        │
///                                          ▼
///  queries ──▶ QueryService ◀── ReadModel ◀── Notifier ──▶ subscribers
/// ```
///
/// ## Usage
/// ```rust,no_run
/// use outcome_engine::application::engine::{Engine, EngineConfig, EngineDeps};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = Engine::start(EngineConfig::default(), EngineDeps::in_memory());
/// let report = engine.recover().await?;
/// assert!(report.suspended.is_empty());
/// engine.shutdown().await;
/// # Ok(())
/// # }
/// ```

use super::dto::{CancelOutcome, EngineNotification, MatchOutcome, ServerMessage};
use super::errors::{CommandError, EngineError};
use super::outbound::{DispatcherConfig, EventSubscriber, Notifier, OutboundDispatcher};
use super::read_model::ReadModel;
use super::registry::{BookRegistry, MarketState};
use super::replay::Replayer;
use super::services::{
    CommandHandler, CoordinatorConfig, DistributedCoordinator, MatchingService, PartitionConfig, QueryService,
};
use super::use_cases::{CancelOrderUseCase, ExecutionContext, MatchOrderUseCase};
use crate::domain::entities::{AccountId, MarketKey, OrderId};
use crate::domain::validation::{OrderValidator, ValidatedCancel, ValidationConfig};
use crate::infrastructure::event_log::{EventLog, InMemoryEventLog};
use crate::infrastructure::lease::{InMemoryLeaseStore, LeaseStore};
use crate::infrastructure::snapshot_store::{InMemorySnapshotStore, SharedBookStore};
use crate::shared::ids::IdGenerator;
use crate::shared::protocol::{ClientMessage, ValidatedOrder};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Written into every event and used as the lease holder name.
    pub instance_id: String,
    pub partitions: PartitionConfig,
    /// Default deadline for `submit_order`.
    pub submit_timeout: Duration,
    /// Bound on a single event log append.
    pub append_timeout: Duration,
    pub lease_ttl: Duration,
    pub lease_retries: u32,
    pub lease_retry_backoff: Duration,
    /// Levels per side carried in book notifications and snapshots.
    pub depth_levels: usize,
    /// Trades kept per market for `recent_trades`.
    pub recent_trades: usize,
    pub multi_instance_markets: HashSet<MarketKey>,
    pub validation: ValidationConfig,
    pub dispatcher: DispatcherConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance_id: "engine-1".to_string(),
            partitions: PartitionConfig::default(),
            submit_timeout: Duration::from_secs(30),
            append_timeout: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(5),
            lease_retries: 3,
            lease_retry_backoff: Duration::from_millis(20),
            depth_levels: 20,
            recent_trades: 100,
            multi_instance_markets: HashSet::new(),
            validation: ValidationConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

/// Infrastructure the engine runs on.
pub struct EngineDeps {
    pub log: Arc<dyn EventLog>,
    pub leases: Arc<dyn LeaseStore>,
    pub snapshots: Arc<dyn SharedBookStore>,
    pub subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl EngineDeps {
    /// Everything in memory, no subscribers.
    pub fn in_memory() -> Self {
        Self {
            log: Arc::new(InMemoryEventLog::new()),
            leases: Arc::new(InMemoryLeaseStore::new()),
            snapshots: Arc::new(InMemorySnapshotStore::new()),
            subscribers: Vec::new(),
        }
    }
}

/// Outcome of startup recovery.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub recovered: Vec<MarketKey>,
    /// Markets that failed to replay, with the reason. They refuse writes
    /// until `resync_market` succeeds.
    pub suspended: Vec<(MarketKey, String)>,
}

pub struct Engine {
    config: EngineConfig,
    ctx: Arc<ExecutionContext>,
    local: Arc<MatchingService>,
    commands: CommandHandler,
    queries: QueryService,
    dispatcher: Arc<OutboundDispatcher>,
}

impl Engine {
    /// Builds the engine and spawns its workers. Requires a Tokio runtime.
    pub fn start(config: EngineConfig, deps: EngineDeps) -> Self {
        let read_model = Arc::new(ReadModel::new(config.recent_trades));
        let dispatcher = Arc::new(OutboundDispatcher::start(deps.subscribers, config.dispatcher.clone()));
        let notifier = Arc::new(Notifier::new(read_model.clone(), dispatcher.clone()));

        let ctx = Arc::new(ExecutionContext {
            instance_id: Arc::from(config.instance_id.as_str()),
            log: deps.log.clone(),
            replayer: Replayer::new(deps.log.clone(), Some(deps.snapshots.clone())),
            registry: Arc::new(BookRegistry::new()),
            notifier,
            append_timeout: config.append_timeout,
            depth_levels: config.depth_levels,
        });

        let ids = Arc::new(IdGenerator::new(&config.instance_id));
        let match_uc = Arc::new(MatchOrderUseCase::new(ctx.clone()));
        let cancel_uc = Arc::new(CancelOrderUseCase::new(ctx.clone()));
        let multi_instance = Arc::new(config.multi_instance_markets.clone());

        let local = Arc::new(MatchingService::start(
            config.partitions.clone(),
            ctx.clone(),
            match_uc.clone(),
            cancel_uc.clone(),
            ids.clone(),
        ));
        let distributed = DistributedCoordinator::new(
            CoordinatorConfig {
                lease_ttl: config.lease_ttl,
                lease_retries: config.lease_retries,
                retry_backoff: config.lease_retry_backoff,
            },
            ctx.clone(),
            deps.leases,
            deps.snapshots.clone(),
            match_uc,
            cancel_uc,
            ids,
        );

        let commands = CommandHandler::new(
            OrderValidator::with_config(config.validation.clone()),
            local.clone(),
            distributed,
            multi_instance.clone(),
            config.submit_timeout,
        );
        let queries = QueryService::new(read_model, deps.snapshots, multi_instance, config.depth_levels);

        tracing::info!(
            instance_id = %config.instance_id,
            partitions = local.partition_count(),
            multi_instance = config.multi_instance_markets.len(),
            "engine started"
        );

        Self {
            config,
            ctx,
            local,
            commands,
            queries,
            dispatcher,
        }
    }

    /// Rebuilds every market found in the event log.
    ///
    /// A market whose replay fails is suspended and listed in the report;
    /// the others are ready for writes. Only errors listing the log itself
    /// fail the whole recovery.
    pub async fn recover(&self) -> Result<RecoveryReport, EngineError> {
        let mut report = RecoveryReport::default();

        for market in self.ctx.log.markets().await? {
            let slot = self.ctx.registry.slot(market);
            let mut state = slot.state.lock().await;
            match self.ctx.ensure_loaded(&mut state).await {
                Ok(()) => {
                    self.warm_read_model(&state).await;
                    report.recovered.push(market);
                }
                Err(e) => {
                    let reason = state.suspended.clone().unwrap_or_else(|| e.to_string());
                    report.suspended.push((market, reason));
                }
            }
        }

        tracing::info!(
            recovered = report.recovered.len(),
            suspended = report.suspended.len(),
            "recovery finished"
        );
        Ok(report)
    }

    /// Replays a market from scratch and lifts its suspension on success.
    pub async fn resync_market(&self, market: MarketKey) -> Result<(), EngineError> {
        let slot = self.ctx.registry.slot(market);
        let mut state = slot.state.lock().await;

        let fresh = self.ctx.replayer.rebuild(market).await?;
        *state = fresh;
        self.ctx.registry.clear_suspended(market);
        self.ctx.notifier.read_model().reset(market);
        self.warm_read_model(&state).await;

        tracing::info!(market = %market, sequence = state.last_sequence, "market resynchronised");
        Ok(())
    }

    /// Submits with the configured default deadline.
    pub async fn submit_order(&self, order: ValidatedOrder) -> Result<MatchOutcome, EngineError> {
        self.commands.submit(order, self.config.submit_timeout).await
    }

    pub async fn submit_order_with_deadline(
        &self,
        order: ValidatedOrder,
        deadline: Duration,
    ) -> Result<MatchOutcome, EngineError> {
        self.commands.submit(order, deadline).await
    }

    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        market: MarketKey,
        account_id: AccountId,
    ) -> Result<CancelOutcome, EngineError> {
        self.commands
            .cancel(ValidatedCancel {
                order_id,
                market,
                account_id,
            })
            .await
    }

    /// Serves one client message end to end.
    pub async fn handle(&self, message: ClientMessage) -> ServerMessage {
        match message {
            ClientMessage::CreateOrder(command) => match self.commands.create_order(&command).await {
                Ok(outcome) => ServerMessage::OrderAccepted(outcome),
                Err(e) => rejected(e),
            },
            ClientMessage::CancelOrder(command) => match self.commands.cancel_order(&command).await {
                Ok(outcome) => ServerMessage::OrderCancelled(outcome),
                Err(e) => rejected(e),
            },
            ClientMessage::MarketData { market } => match self.queries.market_data(market).await {
                Ok(snapshot) => ServerMessage::MarketData { market, snapshot },
                Err(e) => rejected(e.into()),
            },
            ClientMessage::OrderBook { market, depth } => match self.queries.order_book(market, depth).await {
                Ok(depth) => ServerMessage::OrderBook { market, depth },
                Err(e) => rejected(e.into()),
            },
            ClientMessage::RecentTrades { market, limit } => ServerMessage::Trades {
                market,
                trades: self.queries.recent_trades(market, limit.unwrap_or(self.config.recent_trades)),
            },
        }
    }

    pub fn commands(&self) -> &CommandHandler {
        &self.commands
    }

    pub fn queries(&self) -> &QueryService {
        &self.queries
    }

    pub fn registry(&self) -> &Arc<BookRegistry> {
        &self.ctx.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stops the matching workers, then drains outbound delivery.
    pub async fn shutdown(&self) {
        self.local.shutdown().await;
        self.dispatcher.shutdown().await;
        tracing::info!(instance_id = %self.config.instance_id, "engine stopped");
    }

    /// Puts the book and its logged trades into the read model, without
    /// notifying subscribers again.
    async fn warm_read_model(&self, state: &MarketState) {
        let read_model = self.ctx.notifier.read_model();
        match self.ctx.log.read_from(state.market, 1).await {
            Ok(events) => {
                for event in &events {
                    if let Some(trade) = event.trade() {
                        read_model.apply(&EngineNotification::TradeExecuted {
                            sequence: event.sequence,
                            trade: trade.clone(),
                        });
                    }
                }
            }
            Err(e) => tracing::warn!(market = %state.market, error = %e, "could not load trade history"),
        }
        read_model.apply(&self.ctx.book_changed(state));
    }
}

fn rejected(error: CommandError) -> ServerMessage {
    match &error {
        CommandError::Validation(e) => tracing::debug!(error = %e, "request rejected"),
        CommandError::Processing(e) => tracing::info!(error = %e, retryable = e.is_retryable(), "request failed"),
    }
    ServerMessage::Rejected {
        retryable: error.is_retryable(),
        reason: error.to_string(),
    }
}
