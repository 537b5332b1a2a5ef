/// Order Validator - Structural checks on the write path
///
/// Commands are checked before they reach the matching core. The matching
/// algorithm itself assumes every order it sees passed these checks.
///
/// ## Validation Rules
/// - All required fields are present
/// - Side is `buy` or `sell` (case-insensitive)
/// - Order type is `limit` (or absent)
/// - Price is on the 0.0001 tick and inside `[min_price, max_price]`
/// - Quantity is positive and not above `max_quantity`
/// - Market is in the allow-list, when one is configured
///
/// ## Usage
/// ```rust
/// use outcome_engine::domain::validation::OrderValidator;
/// use outcome_engine::domain::entities::MarketKey;
/// use outcome_engine::shared::protocol::CreateOrderCommand;
/// use rust_decimal::Decimal;
///
/// let validator = OrderValidator::new();
/// let command = CreateOrderCommand {
///     market: Some(MarketKey::new(1, 1)),
///     account_id: Some(7),
///     side: Some("buy".into()),
///     order_type: None,
///     price: Some(Decimal::new(60, 2)),
///     quantity: Some(10),
/// };
/// assert!(validator.validate_create(&command).is_ok());
/// ```

use crate::domain::entities::{AccountId, MarketKey, OrderId, Side};
use crate::domain::price::{Price, PriceError};
use crate::shared::protocol::{CancelOrderCommand, CreateOrderCommand, ValidatedOrder};
use thiserror::Error;

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid side '{0}', expected buy or sell")]
    InvalidSide(String),

    #[error("unsupported order type '{0}', only limit orders are accepted")]
    UnsupportedOrderType(String),

    #[error("invalid price: {0}")]
    InvalidPrice(#[from] PriceError),

    #[error("price {price} outside [{min}, {max}]")]
    PriceOutOfRange { price: Price, min: Price, max: Price },

    #[error("quantity must be greater than zero")]
    InvalidQuantity,

    #[error("quantity {quantity} exceeds maximum {max}")]
    QuantityOutOfRange { quantity: u64, max: u64 },

    #[error("market {0} is not open for trading")]
    MarketNotAllowed(MarketKey),
}

/// Order validation configuration
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Minimum price (inclusive)
    pub min_price: Price,

    /// Maximum price (inclusive)
    pub max_price: Price,

    /// Maximum quantity (inclusive)
    pub max_quantity: u64,

    /// Allowed markets (empty means all markets allowed)
    pub allowed_markets: Vec<MarketKey>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_price: Price::MIN_TRADABLE,
            max_price: Price::MAX_TRADABLE,
            max_quantity: 1_000_000,
            allowed_markets: Vec::new(),
        }
    }
}

/// Validated cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedCancel {
    pub order_id: OrderId,
    pub market: MarketKey,
    pub account_id: AccountId,
}

#[derive(Debug, Clone, Default)]
pub struct OrderValidator {
    config: ValidationConfig,
}

impl OrderValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn validate_create(&self, command: &CreateOrderCommand) -> Result<ValidatedOrder, ValidationError> {
        let market = command.market.ok_or(ValidationError::MissingField("market"))?;
        let account_id = command.account_id.ok_or(ValidationError::MissingField("account_id"))?;
        let side = self.validate_side(command.side.as_deref())?;
        self.validate_order_type(command.order_type.as_deref())?;
        let price = self.validate_price(command)?;
        let quantity = self.validate_quantity(command.quantity)?;
        self.validate_market(market)?;

        Ok(ValidatedOrder {
            market,
            account_id,
            side,
            price,
            quantity,
        })
    }

    pub fn validate_cancel(&self, command: &CancelOrderCommand) -> Result<ValidatedCancel, ValidationError> {
        Ok(ValidatedCancel {
            order_id: command.order_id.ok_or(ValidationError::MissingField("order_id"))?,
            market: command.market.ok_or(ValidationError::MissingField("market"))?,
            account_id: command.account_id.ok_or(ValidationError::MissingField("account_id"))?,
        })
    }

    fn validate_side(&self, side: Option<&str>) -> Result<Side, ValidationError> {
        let side = side.ok_or(ValidationError::MissingField("side"))?;
        match side.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            _ => Err(ValidationError::InvalidSide(side.to_string())),
        }
    }

    fn validate_order_type(&self, order_type: Option<&str>) -> Result<(), ValidationError> {
        match order_type {
            None => Ok(()),
            Some(t) if t.trim().eq_ignore_ascii_case("limit") => Ok(()),
            Some(t) => Err(ValidationError::UnsupportedOrderType(t.to_string())),
        }
    }

    fn validate_price(&self, command: &CreateOrderCommand) -> Result<Price, ValidationError> {
        let raw = command.price.ok_or(ValidationError::MissingField("price"))?;
        let price = Price::from_decimal(raw)?;
        if price < self.config.min_price || price > self.config.max_price {
            return Err(ValidationError::PriceOutOfRange {
                price,
                min: self.config.min_price,
                max: self.config.max_price,
            });
        }
        Ok(price)
    }

    fn validate_quantity(&self, quantity: Option<u64>) -> Result<u64, ValidationError> {
        let quantity = quantity.ok_or(ValidationError::MissingField("quantity"))?;
        if quantity == 0 {
            return Err(ValidationError::InvalidQuantity);
        }
        if quantity > self.config.max_quantity {
            return Err(ValidationError::QuantityOutOfRange {
                quantity,
                max: self.config.max_quantity,
            });
        }
        Ok(quantity)
    }

    fn validate_market(&self, market: MarketKey) -> Result<(), ValidationError> {
        if !self.config.allowed_markets.is_empty() && !self.config.allowed_markets.contains(&market) {
            return Err(ValidationError::MarketNotAllowed(market));
        }
        Ok(())
    }
}
