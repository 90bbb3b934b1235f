use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::pod::{Pod, PodStatus};
use crate::resources::{ResourceVector, MILLI, RESOURCE_PODS};
use crate::types::{node_name, PodKey};
use k8s_openapi::api::core::v1;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Snapshot of a node for metrics output
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetrics {
    pub allocatable: ResourceVector,
    pub running_pods_num: usize,
    pub terminating_pods_num: usize,
    pub failed_pods_num: usize,
    pub total_resource_request: ResourceVector,
    pub total_resource_usage: ResourceVector,
}

/// Allocatable resources of a Kubernetes node: `status.allocatable`,
/// falling back to `status.capacity`
pub fn node_allocatable(node: &v1::Node) -> Result<ResourceVector> {
    match node
        .status
        .as_ref()
        .and_then(|s| s.allocatable.as_ref().or(s.capacity.as_ref()))
    {
        Some(list) => ResourceVector::from_quantities(list),
        None => Ok(ResourceVector::new()),
    }
}

/// Pod-count limit carried by the `pods` resource, if listed
pub fn pod_capacity(allocatable: &ResourceVector) -> Option<i64> {
    allocatable
        .contains(RESOURCE_PODS)
        .then(|| allocatable.get(RESOURCE_PODS) / MILLI)
}

/// A simulated node: a Kubernetes node object plus the pods bound to it.
///
/// The node is a passive store. It performs an admission check when a pod
/// is bound but otherwise never changes state on its own; the orchestrator
/// decides when terminated pods are garbage-collected.
#[derive(Debug, Clone)]
pub struct Node {
    v1: v1::Node,
    name: String,
    allocatable: ResourceVector,
    pods: BTreeMap<PodKey, Pod>,
}

impl Node {
    /// Create a node from its Kubernetes object. Allocatable resources come
    /// from `status.allocatable`, falling back to `status.capacity`.
    pub fn new(v1: v1::Node) -> Result<Self> {
        let name = node_name(&v1)?.to_string();

        let allocatable = node_allocatable(&v1)?;
        if allocatable.is_zero() {
            warn!("Node {} declares no allocatable resources", name);
        }

        Ok(Self {
            v1,
            name,
            allocatable,
            pods: BTreeMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The Kubernetes node object
    pub fn v1(&self) -> &v1::Node {
        &self.v1
    }

    pub fn allocatable(&self) -> &ResourceVector {
        &self.allocatable
    }

    /// Maximum number of pods, if the node declares a `pods` resource
    pub fn pod_capacity(&self) -> Option<i64> {
        pod_capacity(&self.allocatable)
    }

    pub fn pods(&self) -> impl Iterator<Item = &Pod> {
        self.pods.values()
    }

    pub fn pod(&self, key: &PodKey) -> Option<&Pod> {
        self.pods.get(key)
    }

    /// Pods holding resources at `clock`: running or terminating
    pub fn active_pods(&self, clock: Clock) -> impl Iterator<Item = &Pod> {
        self.pods
            .values()
            .filter(move |p| p.is_running(clock) || p.is_terminating(clock))
    }

    pub fn running_pods_num(&self, clock: Clock) -> usize {
        self.pods.values().filter(|p| p.is_running(clock)).count()
    }

    pub fn terminating_pods_num(&self, clock: Clock) -> usize {
        self.pods.values().filter(|p| p.is_terminating(clock)).count()
    }

    pub fn failed_pods_num(&self, clock: Clock) -> usize {
        self.pods.values().filter(|p| p.is_failed(clock)).count()
    }

    /// Sum of requests of running and terminating pods
    pub fn total_resource_request(&self, clock: Clock) -> ResourceVector {
        self.active_pods(clock).map(|p| p.resource_request()).sum()
    }

    /// Sum of actual usage of running pods
    pub fn total_resource_usage(&self, clock: Clock) -> Result<ResourceVector> {
        let mut total = ResourceVector::new();
        for pod in self.pods.values() {
            total += &pod.resource_usage_at(clock)?;
        }
        Ok(total)
    }

    /// Bind a pod to this node at `clock`.
    ///
    /// The pod is admitted as `Ok` only if the requests of running and
    /// terminating pods plus its own request fit into allocatable and the
    /// running pod count stays within the pod limit; otherwise it is
    /// recorded as `OverCapacity` and never runs.
    ///
    /// The pod limit counts running pods only. `PodFitsResources` also
    /// counts terminating pods, so the scheduler is the stricter of the two.
    pub fn bind_pod(&mut self, clock: Clock, pod: v1::Pod) -> Result<Pod> {
        let key = PodKey::from_v1(&pod)?;
        if self.pods.contains_key(&key) {
            return Err(CoreError::pod_already_bound(key.to_string(), &self.name));
        }

        let mut bound = Pod::new(pod, clock, PodStatus::Ok, &self.name)?;

        let requested = &self.total_resource_request(clock) + bound.resource_request();
        let fits_resources = self.allocatable.dominates(&requested);
        let fits_count = self
            .pod_capacity()
            .map_or(true, |cap| self.running_pods_num(clock) as i64 + 1 <= cap);

        if !(fits_resources && fits_count) {
            warn!(
                "Pod {} exceeds capacity of node {} (requested {}, allocatable {})",
                key, self.name, requested, self.allocatable
            );
            bound = Pod::new(bound.v1().clone(), clock, PodStatus::OverCapacity, &self.name)?;
        } else {
            debug!("Pod {} bound to node {}", key, self.name);
        }

        self.pods.insert(key, bound.clone());
        Ok(bound)
    }

    /// Request deletion of a bound pod. Returns false when the pod is not on
    /// this node or is already deleted or terminated.
    pub fn delete_pod(&mut self, clock: Clock, key: &PodKey) -> bool {
        match self.pods.get_mut(key) {
            Some(pod) => {
                if pod.delete(clock) {
                    debug!("Pod {} on node {} marked for deletion", key, self.name);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Remove pods that have completed or whose grace period has elapsed.
    /// Returns the number of pods removed.
    pub fn gc_terminated_pods(&mut self, clock: Clock) -> usize {
        let before = self.pods.len();
        self.pods.retain(|_, pod| !pod.is_terminated(clock));
        let removed = before - self.pods.len();
        if removed > 0 {
            debug!("Removed {} terminated pods from node {}", removed, self.name);
        }
        removed
    }

    pub fn metrics(&self, clock: Clock) -> Result<NodeMetrics> {
        Ok(NodeMetrics {
            allocatable: self.allocatable.clone(),
            running_pods_num: self.running_pods_num(clock),
            terminating_pods_num: self.terminating_pods_num(clock),
            failed_pods_num: self.failed_pods_num(clock),
            total_resource_request: self.total_resource_request(clock),
            total_resource_usage: self.total_resource_usage(clock)?,
        })
    }
}
