/// Application Layer - Use Cases and Services
///
/// Orchestrates the domain against the event log, the lease store and the
/// snapshot store. Infrastructure is injected through traits, so the whole
/// layer runs against in-memory implementations in tests.
///
/// ## Modules
/// - `engine`: wiring and the public facade (`Engine`)
/// - `services`: matching core, distributed coordinator, command/query split
/// - `use_cases`: match and cancel against a locked market
/// - `registry`: per-market slots and suspension bookkeeping
/// - `replay`: rebuilding books from the event log
/// - `read_model` / `outbound`: notifications, subscribers, query views
/// - `volume`: rolling 24h traded volume
/// - `dto` / `errors`: cross-layer types

pub mod dto;
pub mod engine;
pub mod errors;
pub mod outbound;
pub mod read_model;
pub mod registry;
pub mod replay;
pub mod services;
pub mod use_cases;
pub mod volume;

pub use dto::{CancelOutcome, EngineNotification, MarketDataSnapshot, MatchOutcome, ServerMessage};
pub use engine::{Engine, EngineConfig, EngineDeps, RecoveryReport};
pub use errors::{CommandError, EngineError, ReplayError};
pub use services::{CommandHandler, MatchingService, QueryService};
