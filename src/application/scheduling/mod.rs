//! Priority scheduling: accessors, multi-class queues and worker pools.

pub mod accessor;
pub mod auxiliary_queue;
pub mod blocking_queue;
pub mod consumer_range;
pub mod queuing_map;
pub mod sequenced;
pub mod task;
pub mod worker_pool;

pub use accessor::PriorityAccessor;
pub use auxiliary_queue::{AuxiliaryQueue, PriorityClass};
pub use blocking_queue::BlockingPriorityQueue;
pub use consumer_range::{ConsumerRangeAccessor, SwapOutcome};
pub use queuing_map::QueuingMap;
pub use sequenced::{QueueAccessor, StackAccessor};
pub use task::{Completion, Prioritizable, TaskId, TaskState, no_completion};
pub use worker_pool::{PoolStats, WorkerPool};
