//! Kubesim Scheduler - Pod to Node scheduling
//!
//! This crate provides:
//! - Pending-pod queues (priority heap with nominations, FIFO)
//! - Filter predicates (resources, node selectors, taints, node conditions)
//! - Scoring functions with a map/reduce split
//! - Extenders consulted after the built-in plugins
//! - Preemption of lower-priority pods
//! - A scheduling pass that turns the queue into bind and delete events

pub mod config;
pub mod error;
pub mod extender;
pub mod filter;
pub mod parallel;
pub mod preemption;
pub mod queue;
pub mod scheduler;
pub mod score;
pub mod types;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use config::{HostSelection, PredicateName, PriorityConfig, PriorityName, QueueKind, SchedulerConfig};
pub use error::{Result, SchedulerError};
pub use extender::{Extender, ExtenderArgs, ExtenderFilterResult, HostPriority};
pub use filter::FilterPredicate;
pub use queue::{FifoQueue, PodQueue, PriorityQueue};
pub use scheduler::{GenericScheduler, Scheduler, SchedulingEvent};
pub use score::ScoreFunction;
pub use types::{FailureReason, FilterResult, FitError, NodeInfo, ScoreResult};
