//! Scheduler extenders.
//!
//! An extender is an external policy consulted after the built-in
//! predicates and priorities. The arguments and results mirror the HTTP
//! extender protocol of the Kubernetes scheduler, but extenders here are
//! in-process trait objects.

use crate::error::Result;
use crate::types::NodeInfo;
use async_trait::async_trait;
use k8s_openapi::api::core::v1;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Arguments sent to an extender
#[derive(Debug, Clone)]
pub struct ExtenderArgs {
    pub pod: v1::Pod,
    /// Full node objects, for extenders without a node cache
    pub nodes: Option<Vec<v1::Node>>,
    /// Node names, for node-cache capable extenders
    pub node_names: Option<Vec<String>>,
}

impl ExtenderArgs {
    pub fn new(pod: &v1::Pod, nodes: &[Arc<NodeInfo>], node_cache_capable: bool) -> Self {
        if node_cache_capable {
            Self {
                pod: pod.clone(),
                nodes: None,
                node_names: Some(nodes.iter().map(|n| n.name().to_string()).collect()),
            }
        } else {
            Self {
                pod: pod.clone(),
                nodes: Some(nodes.iter().map(|n| n.node().clone()).collect()),
                node_names: None,
            }
        }
    }

    /// Names of the nodes carried by the arguments, whichever form they take
    pub fn names(&self) -> Vec<String> {
        node_names_of(self.node_names.as_deref(), self.nodes.as_deref())
    }
}

fn node_names_of(names: Option<&[String]>, nodes: Option<&[v1::Node]>) -> Vec<String> {
    match (names, nodes) {
        (Some(names), _) => names.to_vec(),
        (None, Some(nodes)) => nodes
            .iter()
            .filter_map(|n| n.metadata.name.clone())
            .collect(),
        (None, None) => Vec::new(),
    }
}

/// Result of an extender filter call
#[derive(Debug, Clone, Default)]
pub struct ExtenderFilterResult {
    /// Nodes that passed, for extenders without a node cache
    pub nodes: Option<Vec<v1::Node>>,
    /// Nodes that passed, for node-cache capable extenders
    pub node_names: Option<Vec<String>>,
    /// Node name to the reason it was rejected
    pub failed_nodes: BTreeMap<String, String>,
    /// Error reported by the extender itself
    pub error: Option<String>,
}

impl ExtenderFilterResult {
    /// Names of the nodes that passed
    pub fn passed(&self) -> Vec<String> {
        node_names_of(self.node_names.as_deref(), self.nodes.as_deref())
    }
}

/// Score an extender gives a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPriority {
    pub host: String,
    pub score: i64,
}

impl HostPriority {
    pub fn new(host: impl Into<String>, score: i64) -> Self {
        Self {
            host: host.into(),
            score,
        }
    }
}

/// External scheduling policy
#[async_trait]
pub trait Extender: Send + Sync {
    fn name(&self) -> &str;

    /// Multiplier applied to the scores returned by `prioritize`
    fn weight(&self) -> i64;

    /// Errors from an ignorable extender are logged and the extender skipped
    fn is_ignorable(&self) -> bool {
        false
    }

    /// Whether the extender wants node names instead of node objects
    fn is_node_cache_capable(&self) -> bool {
        false
    }

    fn is_interested(&self, _pod: &v1::Pod) -> bool {
        true
    }

    async fn filter(&self, args: ExtenderArgs) -> Result<ExtenderFilterResult>;

    async fn prioritize(&self, args: ExtenderArgs) -> Result<Vec<HostPriority>>;
}
