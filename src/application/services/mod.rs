/// Application Services
///
/// - `matching_service`: partitioned local matching core
/// - `distributed_service`: lease-based writes for multi-instance markets
/// - `command_handler`: validation and routing of write commands
/// - `query_service`: read path over the read model and shared snapshots

pub mod command_handler;
pub mod distributed_service;
pub mod matching_service;
pub mod query_service;

pub use command_handler::CommandHandler;
pub use distributed_service::{CoordinatorConfig, DistributedCoordinator};
pub use matching_service::{MatchingService, PartitionConfig};
pub use query_service::QueryService;
