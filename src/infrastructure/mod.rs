/// Infrastructure Layer - Technical Implementations
///
/// Implementations of the storage traits the application layer depends on,
/// plus the observability endpoints. The domain layer never depends on
/// anything in here.
///
/// ## Modules
/// - `event_log`: durable per-market event log (in-memory and file backed)
/// - `lease`: per-market write leases with fencing tokens
/// - `snapshot_store`: shared book snapshots for multi-instance markets
/// - `observability`: Prometheus metrics and health endpoints

pub mod event_log;
pub mod lease;
pub mod observability;
pub mod snapshot_store;

pub use event_log::{EventLog, EventLogError, FileEventLog, InMemoryEventLog};
pub use lease::{InMemoryLeaseStore, Lease, LeaseError, LeaseStore};
pub use snapshot_store::{InMemorySnapshotStore, SharedBookStore, SnapshotStoreError};
