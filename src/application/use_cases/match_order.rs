/// Match Order Use Case
///
/// Applies one validated order to a market the caller has locked.
///
/// ## Workflow
/// 1. Refuse if the market is suspended
/// 2. Stamp the submission time: `max(now, last_timestamp + 1)`
/// 3. Match against the book (trades at resting prices, remainder rests)
/// 4. Append `OrderSubmitted` plus one `TradeExecuted` per fill, with
///    consecutive sequences
/// 5. Emit trade and book notifications
///
/// The book is mutated before the append. If the append fails the market is
/// suspended rather than rolled back; see `ExecutionContext::persist`.

use super::context::ExecutionContext;
use crate::application::dto::{EngineNotification, MatchOutcome};
use crate::application::errors::EngineError;
use crate::application::registry::MarketState;
use crate::domain::entities::{Order, OrderId, TradeId};
use crate::domain::events::{EventKind, MarketEvent};
use crate::domain::matching::match_order;
use crate::shared::metrics::METRICS;
use crate::shared::protocol::ValidatedOrder;
use crate::shared::timestamp::monotonic_after;
use std::sync::Arc;
use std::time::Instant;

pub struct MatchOrderUseCase {
    ctx: Arc<ExecutionContext>,
}

impl MatchOrderUseCase {
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    pub async fn execute(
        &self,
        state: &mut MarketState,
        request: ValidatedOrder,
        order_id: OrderId,
    ) -> Result<MatchOutcome, EngineError> {
        state.ensure_active()?;
        let market = state.market;
        let started = Instant::now();

        let submitted_at = monotonic_after(state.last_timestamp);
        let order = Order::new(
            order_id,
            market,
            request.account_id,
            request.side,
            request.price,
            request.quantity,
            submitted_at,
        );

        let base = state.last_sequence;
        let mut next_sequence = base + 1;
        let result = match_order(&mut state.book, order.clone(), submitted_at, || {
            next_sequence += 1;
            TradeId {
                market,
                sequence: next_sequence,
            }
        });

        let instance_id = self.ctx.instance_id.to_string();
        let mut events = Vec::with_capacity(1 + result.trades.len());
        events.push(MarketEvent {
            sequence: base + 1,
            market,
            instance_id: instance_id.clone(),
            timestamp: submitted_at,
            kind: EventKind::OrderSubmitted { order },
        });
        for trade in &result.trades {
            events.push(MarketEvent {
                sequence: trade.id.sequence,
                market,
                instance_id: instance_id.clone(),
                timestamp: submitted_at,
                kind: EventKind::TradeExecuted { trade: trade.clone() },
            });
        }

        let sequence = self.ctx.persist(state, events).await?;
        state.last_timestamp = submitted_at;
        for trade in &result.trades {
            state.volume.record(trade.executed_at, trade.quantity);
        }

        let market_label = market.to_string();
        METRICS
            .orders_total
            .with_label_values(&[request.side.as_str(), &market_label])
            .inc();
        METRICS
            .trades_total
            .with_label_values(&[&market_label])
            .inc_by(result.trades.len() as f64);
        METRICS
            .matching_duration
            .with_label_values(&[&market_label])
            .observe(started.elapsed().as_micros() as f64);

        for trade in &result.trades {
            self.ctx.notifier.emit(EngineNotification::TradeExecuted {
                sequence: trade.id.sequence,
                trade: trade.clone(),
            });
        }
        self.ctx.notifier.emit(self.ctx.book_changed(state));

        tracing::debug!(
            market = %market,
            order_id,
            trades = result.trades.len(),
            rested = result.rested,
            sequence,
            "order matched"
        );

        Ok(MatchOutcome {
            order: result.taker,
            trades: result.trades.into_vec(),
            maker_fills: result.maker_fills.into_vec(),
            sequence,
        })
    }
}
