/// Cancel Order Use Case
///
/// Removes a resting order from a market the caller has locked and records
/// an `OrderCancelled` event carrying the quantity that was still open.
///
/// ## Rules
/// - Only the owning account may cancel
/// - Unknown ids (never placed, already filled, already cancelled) fail with
///   `OrderNotFound`; the book is left untouched

use super::context::ExecutionContext;
use crate::application::dto::CancelOutcome;
use crate::application::errors::EngineError;
use crate::application::registry::MarketState;
use crate::domain::events::{EventKind, MarketEvent};
use crate::domain::orderbook::OrderBook;
use crate::domain::validation::ValidatedCancel;
use crate::shared::metrics::METRICS;
use crate::shared::timestamp::monotonic_after;
use std::sync::Arc;

pub struct CancelOrderUseCase {
    ctx: Arc<ExecutionContext>,
}

impl CancelOrderUseCase {
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    pub async fn execute(&self, state: &mut MarketState, request: ValidatedCancel) -> Result<CancelOutcome, EngineError> {
        state.ensure_active()?;
        let market = state.market;
        let market_label = market.to_string();

        let owner = match state.book.get(request.order_id) {
            Some(order) => order.account_id,
            None => {
                METRICS
                    .cancellations_total
                    .with_label_values(&[&market_label, "not_found"])
                    .inc();
                return Err(EngineError::OrderNotFound {
                    market,
                    order_id: request.order_id,
                });
            }
        };
        if owner != request.account_id {
            METRICS
                .cancellations_total
                .with_label_values(&[&market_label, "rejected"])
                .inc();
            return Err(EngineError::NotOwner {
                order_id: request.order_id,
                account_id: request.account_id,
            });
        }

        let Some(mut order) = state.book.remove(request.order_id) else {
            return Err(EngineError::OrderNotFound {
                market,
                order_id: request.order_id,
            });
        };
        order.cancel();

        let timestamp = monotonic_after(state.last_timestamp);
        let event = MarketEvent {
            sequence: state.last_sequence + 1,
            market,
            instance_id: self.ctx.instance_id.to_string(),
            timestamp,
            kind: EventKind::OrderCancelled {
                order_id: order.id,
                account_id: order.account_id,
                remaining: order.remaining,
            },
        };
        let sequence = self.ctx.persist(state, vec![event]).await?;
        state.last_timestamp = timestamp;

        METRICS
            .cancellations_total
            .with_label_values(&[&market_label, "cancelled"])
            .inc();
        self.ctx.notifier.emit(self.ctx.book_changed(state));
        tracing::debug!(market = %market, order_id = order.id, remaining = order.remaining, "order cancelled");

        Ok(CancelOutcome { order, sequence })
    }
}
