//! Outcome market matching engine
//!
//! Continuous double auction for milestone outcome markets: limit orders
//! priced as implied probabilities, price-time priority, a durable
//! per-market event log the books can be rebuilt from, and lease-based
//! coordination for markets written by several instances.
//!
//! ## Layers
//! - `domain`: order book, matching, validation (no I/O)
//! - `application`: matching core, distributed coordinator, read model
//! - `infrastructure`: event log, leases, snapshot store, observability
//! - `interfaces`: command-line driver
//! - `shared`: protocol types, metrics, utilities

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod shared;
