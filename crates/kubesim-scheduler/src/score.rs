use crate::error::Result;
use crate::filter::{node_taints, toleration_matches, TAINT_EFFECT_PREFER_NO_SCHEDULE};
use crate::types::NodeInfo;
use k8s_openapi::api::core::v1;
use kubesim_core::pod::resource_request;
use kubesim_core::resources::{RESOURCE_CPU, RESOURCE_MEMORY};
use std::sync::Arc;
use tracing::debug;

/// Highest score a single priority function gives a node
pub const MAX_PRIORITY: i64 = 10;

/// Scoring function trait
pub trait ScoreFunction: Send + Sync {
    /// Score a node for the given pod (0-10, higher is better)
    fn score(&self, pod: &v1::Pod, node: &NodeInfo) -> Result<i64>;

    /// Adjust the scores of all nodes once every node has been scored.
    /// `scores[i]` belongs to `nodes[i]`.
    fn reduce(&self, _pod: &v1::Pod, _nodes: &[Arc<NodeInfo>], _scores: &mut [i64]) -> Result<()> {
        Ok(())
    }

    /// Name of the scoring function
    fn name(&self) -> &str;
}

/// CPU and memory requested on the node once `pod` is added, with the
/// node's allocatable amounts
fn requested_after(pod: &v1::Pod, node: &NodeInfo) -> Result<[(i64, i64); 2]> {
    let request = resource_request(pod)?;
    let total = node.requested() + &request;
    let allocatable = node.allocatable();
    Ok([
        (total.get(RESOURCE_CPU), allocatable.get(RESOURCE_CPU)),
        (total.get(RESOURCE_MEMORY), allocatable.get(RESOURCE_MEMORY)),
    ])
}

fn unused_score(requested: i64, capacity: i64) -> i64 {
    if capacity == 0 || requested > capacity {
        return 0;
    }
    (capacity - requested) * MAX_PRIORITY / capacity
}

fn used_score(requested: i64, capacity: i64) -> i64 {
    if capacity == 0 || requested > capacity {
        return 0;
    }
    requested * MAX_PRIORITY / capacity
}

/// Prefer nodes with the most unrequested CPU and memory
pub struct LeastRequested;

impl ScoreFunction for LeastRequested {
    fn score(&self, pod: &v1::Pod, node: &NodeInfo) -> Result<i64> {
        let [(cpu, cpu_cap), (memory, memory_cap)] = requested_after(pod, node)?;
        let score = (unused_score(cpu, cpu_cap) + unused_score(memory, memory_cap)) / 2;

        debug!(
            "Node {} least requested score: {} (cpu {}/{}, memory {}/{})",
            node.name(),
            score,
            cpu,
            cpu_cap,
            memory,
            memory_cap
        );
        Ok(score)
    }

    fn name(&self) -> &str {
        "LeastRequested"
    }
}

/// Prefer nodes with the most requested CPU and memory
pub struct MostRequested;

impl ScoreFunction for MostRequested {
    fn score(&self, pod: &v1::Pod, node: &NodeInfo) -> Result<i64> {
        let [(cpu, cpu_cap), (memory, memory_cap)] = requested_after(pod, node)?;
        let score = (used_score(cpu, cpu_cap) + used_score(memory, memory_cap)) / 2;

        debug!("Node {} most requested score: {}", node.name(), score);
        Ok(score)
    }

    fn name(&self) -> &str {
        "MostRequested"
    }
}

/// Prefer nodes whose CPU and memory utilization stay close to each other
pub struct BalancedAllocation;

impl ScoreFunction for BalancedAllocation {
    fn score(&self, pod: &v1::Pod, node: &NodeInfo) -> Result<i64> {
        let [(cpu, cpu_cap), (memory, memory_cap)] = requested_after(pod, node)?;
        if cpu_cap == 0 || memory_cap == 0 {
            return Ok(0);
        }

        let cpu_fraction = cpu as f64 / cpu_cap as f64;
        let memory_fraction = memory as f64 / memory_cap as f64;
        if cpu_fraction >= 1.0 || memory_fraction >= 1.0 {
            return Ok(0);
        }

        let variance = (cpu_fraction - memory_fraction).abs();
        let score = ((1.0 - variance) * MAX_PRIORITY as f64) as i64;

        debug!(
            "Node {} balanced allocation score: {} (variance: {:.3})",
            node.name(),
            score,
            variance
        );
        Ok(score)
    }

    fn name(&self) -> &str {
        "BalancedAllocation"
    }
}

/// Prefer nodes with fewer PreferNoSchedule taints the pod does not tolerate
pub struct TaintToleration;

impl ScoreFunction for TaintToleration {
    /// Raw count of intolerable taints; `reduce` turns it into a score
    fn score(&self, pod: &v1::Pod, node: &NodeInfo) -> Result<i64> {
        let tolerations: Vec<&v1::Toleration> = pod
            .spec
            .as_ref()
            .and_then(|s| s.tolerations.as_ref())
            .map(|t| {
                t.iter()
                    .filter(|t| {
                        t.effect.as_deref().is_none_or(|e| {
                            e.is_empty() || e == TAINT_EFFECT_PREFER_NO_SCHEDULE
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let count = node_taints(node.node())
            .iter()
            .filter(|taint| taint.effect == TAINT_EFFECT_PREFER_NO_SCHEDULE)
            .filter(|taint| !tolerations.iter().any(|t| toleration_matches(t, taint)))
            .count();
        Ok(count as i64)
    }

    fn reduce(&self, _pod: &v1::Pod, _nodes: &[Arc<NodeInfo>], scores: &mut [i64]) -> Result<()> {
        let max = scores.iter().copied().max().unwrap_or(0);
        for score in scores.iter_mut() {
            *score = if max == 0 {
                MAX_PRIORITY
            } else {
                MAX_PRIORITY * (max - *score) / max
            };
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "TaintToleration"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_node, create_test_pod};

    fn node_info(name: &str, cpu: &str, pods: Vec<v1::Pod>) -> NodeInfo {
        NodeInfo::with_pods(create_test_node(name, cpu, None), pods).unwrap()
    }

    #[test]
    fn test_least_requested() {
        let empty = node_info("node1", "4", vec![]);
        let busy = node_info("node2", "4", vec![create_test_pod("other", "2", 0)]);
        let pod = create_test_pod("test-pod", "1", 0);

        let empty_score = LeastRequested.score(&pod, &empty).unwrap();
        let busy_score = LeastRequested.score(&pod, &busy).unwrap();

        // cpu (4-1)*10/4 = 7, memory untouched = 10
        assert_eq!(empty_score, 8);
        assert!(empty_score > busy_score);
    }

    #[test]
    fn test_most_requested() {
        let empty = node_info("node1", "4", vec![]);
        let busy = node_info("node2", "4", vec![create_test_pod("other", "2", 0)]);
        let pod = create_test_pod("test-pod", "1", 0);

        assert!(MostRequested.score(&pod, &busy).unwrap() > MostRequested.score(&pod, &empty).unwrap());
    }

    #[test]
    fn test_balanced_allocation() {
        let node = node_info("node1", "4", vec![]);
        let pod = create_test_pod("test-pod", "2", 0);

        // cpu fraction 0.5, memory fraction 0
        assert_eq!(BalancedAllocation.score(&pod, &node).unwrap(), 5);

        let full = create_test_pod("big", "4", 0);
        assert_eq!(BalancedAllocation.score(&full, &node).unwrap(), 0);
    }

    #[test]
    fn test_taint_toleration_map_reduce() {
        let mut tainted = create_test_node("node2", "4", None);
        tainted.spec = Some(v1::NodeSpec {
            taints: Some(vec![
                v1::Taint {
                    key: "a".to_string(),
                    effect: TAINT_EFFECT_PREFER_NO_SCHEDULE.to_string(),
                    ..Default::default()
                },
                v1::Taint {
                    key: "b".to_string(),
                    effect: TAINT_EFFECT_PREFER_NO_SCHEDULE.to_string(),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        });
        let nodes = vec![
            Arc::new(node_info("node1", "4", vec![])),
            Arc::new(NodeInfo::new(tainted).unwrap()),
        ];

        let mut pod = create_test_pod("test-pod", "1", 0);
        pod.spec.as_mut().unwrap().tolerations = Some(vec![v1::Toleration {
            key: Some("a".to_string()),
            operator: Some("Exists".to_string()),
            ..Default::default()
        }]);

        let mut scores: Vec<i64> = nodes
            .iter()
            .map(|n| TaintToleration.score(&pod, n).unwrap())
            .collect();
        assert_eq!(scores, vec![0, 1]);

        TaintToleration.reduce(&pod, &nodes, &mut scores).unwrap();
        assert_eq!(scores, vec![MAX_PRIORITY, 0]);
    }

    #[test]
    fn test_taint_toleration_reduce_without_taints() {
        let mut scores = vec![0, 0, 0];
        TaintToleration
            .reduce(&create_test_pod("p", "1", 0), &[], &mut scores)
            .unwrap();
        assert_eq!(scores, vec![MAX_PRIORITY; 3]);
    }
}
