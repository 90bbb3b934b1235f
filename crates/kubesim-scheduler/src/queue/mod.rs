//! Pending-pod queues.
//!
//! A queue holds pods waiting to be scheduled and, for the priority variant,
//! a side table of nominations: pods that preempted victims on a node and
//! are waiting for those victims to go away.

mod fifo;
mod priority;

pub use fifo::FifoQueue;
pub use priority::PriorityQueue;

use crate::error::{Result, SchedulerError};
use k8s_openapi::api::core::v1;
use kubesim_core::{pod_priority, Clock, PodKey};
use std::sync::Arc;

/// Condition type recording the outcome of the last scheduling attempt
pub const POD_SCHEDULED: &str = "PodScheduled";

/// Returns true when `a` must leave the queue before `b`
pub type PodComparator = Arc<dyn Fn(&v1::Pod, &v1::Pod) -> bool + Send + Sync>;

/// Store of pods waiting to be scheduled
pub trait PodQueue: Send + Sync {
    /// Insert a pod; a pod with the same key is replaced in place
    fn push(&mut self, pod: v1::Pod) -> Result<()>;

    /// Remove and return the pod at the front
    fn pop(&mut self) -> Result<Arc<v1::Pod>>;

    /// Return the pod at the front without removing it
    fn front(&self) -> Result<Arc<v1::Pod>>;

    /// Remove a pod and its nomination; returns whether it was queued
    fn delete(&mut self, key: &PodKey) -> bool;

    /// Replace a queued pod; the new pod must have the same key
    fn update(&mut self, key: &PodKey, pod: v1::Pod) -> Result<()>;

    /// Nominate a pod onto a node, replacing any earlier nomination
    fn update_nominated_node(&mut self, pod: &v1::Pod, node_name: &str) -> Result<()>;

    fn remove_nominated_node(&mut self, pod: &v1::Pod) -> Result<()>;

    /// Pods nominated onto a node
    fn nominated_pods(&self, node_name: &str) -> Vec<Arc<v1::Pod>>;

    /// Whether nominations are recorded. Preemption relies on them.
    fn supports_nomination(&self) -> bool {
        true
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Key of a pod entering the queue
pub(crate) fn queue_key(pod: &v1::Pod) -> Result<PodKey> {
    PodKey::from_v1(pod).map_err(|e| SchedulerError::invalid_key(e.to_string()))
}

/// When the pod was last considered for scheduling: the `PodScheduled`
/// condition's probe time, else its transition time, else the creation time
pub fn scheduled_timestamp(pod: &v1::Pod) -> Option<Clock> {
    let condition = pod
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|c| c.iter().find(|c| c.type_ == POD_SCHEDULED));

    condition
        .and_then(|c| c.last_probe_time.as_ref().or(c.last_transition_time.as_ref()))
        .or(pod.metadata.creation_timestamp.as_ref())
        .map(Clock::from)
}

/// Default ordering: higher priority first, then the pod that has waited
/// longest since its last scheduling attempt
pub fn higher_priority_first(a: &v1::Pod, b: &v1::Pod) -> bool {
    let (pa, pb) = (pod_priority(a), pod_priority(b));
    if pa != pb {
        return pa > pb;
    }
    match (scheduled_timestamp(a), scheduled_timestamp(b)) {
        (Some(ta), Some(tb)) => ta < tb,
        (Some(_), None) => true,
        _ => false,
    }
}

pub fn default_comparator() -> PodComparator {
    Arc::new(higher_priority_first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_pod, t0};
    use chrono::Duration;

    #[test]
    fn test_higher_priority_first() {
        let low = create_test_pod("low", "1", 0);
        let high = create_test_pod("high", "1", 10);

        assert!(higher_priority_first(&high, &low));
        assert!(!higher_priority_first(&low, &high));
    }

    #[test]
    fn test_scheduled_timestamp_prefers_condition() {
        let mut pod = create_test_pod("p", "1", 0);
        assert_eq!(scheduled_timestamp(&pod), Some(t0()));

        let probed = t0() + Duration::seconds(30);
        pod.status = Some(v1::PodStatus {
            conditions: Some(vec![v1::PodCondition {
                type_: POD_SCHEDULED.to_string(),
                status: "False".to_string(),
                last_probe_time: Some(probed.to_k8s_time()),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert_eq!(scheduled_timestamp(&pod), Some(probed));

        // An older pod of equal priority goes first
        let fresh = create_test_pod("fresh", "1", 0);
        assert!(higher_priority_first(&fresh, &pod));
    }
}
