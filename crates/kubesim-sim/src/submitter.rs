//! Pod submitters.
//!
//! A submitter decides what happens to the workload: each tick it sees the
//! clock, the nodes and the latest metrics, and returns events that the
//! simulator applies before scheduling.

use crate::error::Result;
use crate::metrics::Metrics;
use async_trait::async_trait;
use k8s_openapi::api::core::v1;
use kubesim_core::{Clock, Node};
use std::collections::BTreeMap;

/// What a submitter asks the simulator to do
#[derive(Debug, Clone)]
pub enum SubmitterEvent {
    /// Queue a new pod
    Submit(Box<v1::Pod>),
    /// Delete a queued or bound pod
    Delete { namespace: String, name: String },
    /// Replace a queued pod
    Update {
        namespace: String,
        name: String,
        pod: Box<v1::Pod>,
    },
    /// The submitter is done and will not be called again
    Terminate,
}

/// Read-only view of the cluster's nodes
pub trait NodeLister: Send + Sync {
    fn list(&self) -> Vec<v1::Node>;
}

impl NodeLister for BTreeMap<String, Node> {
    fn list(&self) -> Vec<v1::Node> {
        self.values().map(|node| node.v1().clone()).collect()
    }
}

/// Source of workload events
#[async_trait]
pub trait Submitter: Send {
    fn name(&self) -> &str;

    /// Events for this tick, applied in order. Must not block.
    async fn submit(
        &mut self,
        clock: Clock,
        nodes: &dyn NodeLister,
        metrics: &Metrics,
    ) -> Result<Vec<SubmitterEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_node;

    #[test]
    fn test_node_map_lists_nodes() {
        let nodes: BTreeMap<String, Node> = ["b", "a"]
            .iter()
            .map(|n| (n.to_string(), Node::new(create_test_node(n, "2")).unwrap()))
            .collect();

        let listed: Vec<String> = nodes
            .list()
            .into_iter()
            .filter_map(|n| n.metadata.name)
            .collect();
        assert_eq!(listed, vec!["a", "b"]);
    }
}
