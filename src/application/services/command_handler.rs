/// Command Handler - write path entry
///
/// Validates incoming commands and routes them by market: single-instance
/// markets go to the local partitioned `MatchingService`, markets listed as
/// multi-instance go through the lease-based `DistributedCoordinator`.
/// Validation failures are reported as `CommandError::Validation` and never
/// reach the engine.

use super::distributed_service::DistributedCoordinator;
use super::matching_service::MatchingService;
use crate::application::dto::{CancelOutcome, MatchOutcome};
use crate::application::errors::{CommandError, EngineError};
use crate::domain::entities::MarketKey;
use crate::domain::validation::{OrderValidator, ValidatedCancel};
use crate::shared::protocol::{CancelOrderCommand, CreateOrderCommand, ValidatedOrder};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub struct CommandHandler {
    validator: OrderValidator,
    local: Arc<MatchingService>,
    distributed: DistributedCoordinator,
    multi_instance: Arc<HashSet<MarketKey>>,
    submit_timeout: Duration,
}

impl CommandHandler {
    pub fn new(
        validator: OrderValidator,
        local: Arc<MatchingService>,
        distributed: DistributedCoordinator,
        multi_instance: Arc<HashSet<MarketKey>>,
        submit_timeout: Duration,
    ) -> Self {
        Self {
            validator,
            local,
            distributed,
            multi_instance,
            submit_timeout,
        }
    }

    pub fn is_multi_instance(&self, market: MarketKey) -> bool {
        self.multi_instance.contains(&market)
    }

    pub async fn create_order(&self, command: &CreateOrderCommand) -> Result<MatchOutcome, CommandError> {
        let order = self.validator.validate_create(command)?;
        Ok(self.submit(order, self.submit_timeout).await?)
    }

    pub async fn cancel_order(&self, command: &CancelOrderCommand) -> Result<CancelOutcome, CommandError> {
        let request = self.validator.validate_cancel(command)?;
        Ok(self.cancel(request).await?)
    }

    /// Submits an already validated order.
    pub async fn submit(&self, order: ValidatedOrder, deadline: Duration) -> Result<MatchOutcome, EngineError> {
        if self.is_multi_instance(order.market) {
            self.distributed.submit(order, deadline).await
        } else {
            self.local.submit(order, deadline).await
        }
    }

    pub async fn cancel(&self, request: ValidatedCancel) -> Result<CancelOutcome, EngineError> {
        if self.is_multi_instance(request.market) {
            self.distributed.cancel(request).await
        } else {
            self.local.cancel(request).await
        }
    }
}
