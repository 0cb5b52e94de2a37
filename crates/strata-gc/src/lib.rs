//! Deferred reference counting and block reclamation for Strata.
//!
//! Tree mutations never touch block counts inline. After a head moves, the
//! filesystem layer enqueues a [`RefCountTask`] naming the subtree that
//! gained or lost a reference. A [`RefCountWorker`] leases due tasks,
//! expands them to block lists, and applies the counts in checkpointed
//! batches. Failed tasks back off exponentially and are dead-lettered after
//! `max_attempts`. The [`Sweeper`] deletes blocks that have sat at zero for
//! the retention grace period.

pub mod error;
pub mod queue;
pub mod sweeper;
pub mod task;
pub mod worker;

pub use error::{GcError, GcResult};
pub use queue::{TaskQueue, REFCOUNT_QUEUE};
pub use sweeper::Sweeper;
pub use task::{Expansion, RefCountTask, TaskOp};
pub use worker::{DrainReport, RefCountWorker};
