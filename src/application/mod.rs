//! Application layer: scheduling, pending-operation bookkeeping and DTOs.

/// Data transfer objects.
pub mod dto;
/// Single-flight operation tracking.
pub mod operations;
/// Priority queues and worker pools.
pub mod scheduling;

pub use dto::{ImageLoadedEvent, Intent, ListenerParams, RequestOutcome};
pub use operations::{OperationCoordinator, OperationKey, OperationTracker, PendingCounts};
pub use scheduling::{PoolStats, PriorityClass, WorkerPool};
