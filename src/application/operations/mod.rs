//! Pending-operation bookkeeping.

pub mod coordinator;
pub mod tracker;

pub use coordinator::{OperationCoordinator, OperationKey, PendingCounts, QueueStatus};
pub use tracker::{CancelOutcome, OperationTracker, TransferOutcome};
