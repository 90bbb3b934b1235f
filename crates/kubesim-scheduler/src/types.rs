use crate::error::Result;
use k8s_openapi::api::core::v1;
use kubesim_core::pod::resource_request;
use kubesim_core::{node_allocatable, node_name, pod_capacity, PodKey, ResourceVector};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A pod occupying a node, with its request parsed once
#[derive(Debug, Clone)]
struct PodInfo {
    key: PodKey,
    pod: Arc<v1::Pod>,
    request: ResourceVector,
}

/// Scheduler view of a node: the node object, its allocatable resources and
/// the pods currently holding resources on it
#[derive(Debug, Clone)]
pub struct NodeInfo {
    node: v1::Node,
    name: String,
    allocatable: ResourceVector,
    requested: ResourceVector,
    pods: Vec<PodInfo>,
}

impl NodeInfo {
    /// Create an empty NodeInfo
    pub fn new(node: v1::Node) -> Result<Self> {
        let name = node_name(&node)?.to_string();
        let allocatable = node_allocatable(&node)?;
        Ok(Self {
            node,
            name,
            allocatable,
            requested: ResourceVector::new(),
            pods: Vec::new(),
        })
    }

    /// Create a NodeInfo holding the given pods
    pub fn with_pods(node: v1::Node, pods: impl IntoIterator<Item = v1::Pod>) -> Result<Self> {
        let mut info = Self::new(node)?;
        for pod in pods {
            info.add_pod(Arc::new(pod))?;
        }
        Ok(info)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> &v1::Node {
        &self.node
    }

    pub fn allocatable(&self) -> &ResourceVector {
        &self.allocatable
    }

    /// Sum of requests of the pods on this node
    pub fn requested(&self) -> &ResourceVector {
        &self.requested
    }

    pub fn pods(&self) -> impl Iterator<Item = &Arc<v1::Pod>> {
        self.pods.iter().map(|p| &p.pod)
    }

    pub fn pod_count(&self) -> usize {
        self.pods.len()
    }

    /// Pod-count limit, if the node declares one
    pub fn allowed_pod_number(&self) -> Option<i64> {
        pod_capacity(&self.allocatable)
    }

    pub fn add_pod(&mut self, pod: Arc<v1::Pod>) -> Result<()> {
        let key = PodKey::from_v1(&pod)?;
        let request = resource_request(&pod)?;
        self.requested += &request;
        self.pods.push(PodInfo { key, pod, request });
        Ok(())
    }

    /// Remove a pod by key; returns whether it was present
    pub fn remove_pod(&mut self, key: &PodKey) -> bool {
        match self.pods.iter().position(|p| &p.key == key) {
            Some(index) => {
                let removed = self.pods.remove(index);
                self.requested -= &removed.request;
                true
            }
            None => false,
        }
    }
}

/// Why a node cannot host a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Not enough of a resource is left on the node
    InsufficientResource {
        resource: String,
        requested: i64,
        used: i64,
        capacity: i64,
    },
    /// The node is at its pod-count limit
    TooManyPods { capacity: i64 },
    NodeSelectorMismatch,
    TaintNotTolerated { taint: String },
    NodeUnschedulable,
    NodeNotReady,
    /// Rejected by an extender
    Extender { extender: String, reason: String },
}

impl FailureReason {
    /// Whether evicting lower-priority pods could clear this reason
    pub fn is_resolvable_by_preemption(&self) -> bool {
        matches!(
            self,
            FailureReason::InsufficientResource { .. } | FailureReason::TooManyPods { .. }
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::InsufficientResource { resource, .. } => {
                write!(f, "Insufficient {}", resource)
            }
            FailureReason::TooManyPods { .. } => write!(f, "Too many pods"),
            FailureReason::NodeSelectorMismatch => {
                write!(f, "node(s) didn't match node selector")
            }
            FailureReason::TaintNotTolerated { .. } => {
                write!(f, "node(s) had taints that the pod didn't tolerate")
            }
            FailureReason::NodeUnschedulable => write!(f, "node(s) were unschedulable"),
            FailureReason::NodeNotReady => write!(f, "node(s) were not ready"),
            FailureReason::Extender { extender, reason } => {
                write!(f, "{} (extender {})", reason, extender)
            }
        }
    }
}

/// Result of filtering a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterResult {
    /// Whether the node passed the filter
    pub fits: bool,
    /// Reasons for failure; empty when the node fits
    pub reasons: Vec<FailureReason>,
}

impl FilterResult {
    /// Create a passing filter result
    pub fn fit() -> Self {
        Self {
            fits: true,
            reasons: Vec::new(),
        }
    }

    /// Create a failing filter result
    pub fn fail(reasons: Vec<FailureReason>) -> Self {
        Self {
            fits: false,
            reasons,
        }
    }
}

/// Every node rejected the pod
#[derive(Debug, Clone)]
pub struct FitError {
    pub pod: PodKey,
    pub num_all_nodes: usize,
    /// Node name to the reasons it was rejected
    pub failed_predicates: BTreeMap<String, Vec<FailureReason>>,
}

impl fmt::Display for FitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for reasons in self.failed_predicates.values() {
            for reason in reasons {
                *counts.entry(reason.to_string()).or_insert(0) += 1;
            }
        }
        let summary: Vec<String> = counts
            .iter()
            .map(|(reason, count)| format!("{} {}", count, reason))
            .collect();

        write!(
            f,
            "pod {}: 0/{} nodes are available: {}.",
            self.pod,
            self.num_all_nodes,
            summary.join(", ")
        )
    }
}

/// Result of scoring a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreResult {
    /// Node name
    pub node_name: String,
    /// Combined weighted score, higher is better
    pub score: i64,
}

impl ScoreResult {
    /// Create a new score result
    pub fn new(node_name: impl Into<String>, score: i64) -> Self {
        Self {
            node_name: node_name.into(),
            score,
        }
    }
}
