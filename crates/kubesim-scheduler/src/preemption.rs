//! Victim selection for preemption.
//!
//! When a pod fits nowhere, the scheduler looks for a node where evicting
//! lower-priority pods would make room, and picks the node where doing so
//! is least disruptive.

use crate::error::Result;
use crate::filter::{pod_fits_on_node, FilterPredicate};
use crate::types::{FitError, NodeInfo};
use k8s_openapi::api::core::v1;
use kubesim_core::{pod_priority, PodKey};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Pods to evict from a node so that the preemptor fits
#[derive(Debug, Clone, Default)]
pub struct Victims {
    pub pods: Vec<Arc<v1::Pod>>,
    /// Disruption budget violations; budgets are not modeled, so always 0
    pub num_pdb_violations: i64,
}

impl Victims {
    fn highest_priority(&self) -> i32 {
        self.pods.iter().map(|p| pod_priority(p)).max().unwrap_or(i32::MIN)
    }

    fn offset_priority_sum(&self) -> i64 {
        self.pods
            .iter()
            .map(|p| pod_priority(p) as i64 + (1i64 << 31))
            .sum()
    }
}

/// A pod already nominated to a node where lower-priority pods are still
/// terminating must wait for them instead of preempting again
pub fn pod_eligible_to_preempt_others(
    pod: &v1::Pod,
    nodes: &BTreeMap<String, Arc<NodeInfo>>,
) -> bool {
    let Some(nominated) = pod
        .status
        .as_ref()
        .and_then(|s| s.nominated_node_name.as_deref())
        .filter(|n| !n.is_empty())
    else {
        return true;
    };

    let Some(node) = nodes.get(nominated) else {
        return true;
    };

    let priority = pod_priority(pod);
    !node.pods().any(|p| {
        p.metadata.deletion_timestamp.is_some() && pod_priority(p) < priority
    })
}

/// Nodes where evicting pods could clear every failure reason. Nodes absent
/// from the failure map are kept as well.
pub fn nodes_where_preemption_might_help(
    nodes: &BTreeMap<String, Arc<NodeInfo>>,
    fit_error: &FitError,
) -> Vec<Arc<NodeInfo>> {
    nodes
        .iter()
        .filter(|(name, _)| match fit_error.failed_predicates.get(name.as_str()) {
            Some(reasons) => reasons.iter().all(|r| r.is_resolvable_by_preemption()),
            None => true,
        })
        .map(|(_, node)| node.clone())
        .collect()
}

/// Higher priority first, then the pod that started earlier
fn more_important(a: &v1::Pod, b: &v1::Pod) -> Ordering {
    let start = |p: &v1::Pod| p.status.as_ref().and_then(|s| s.start_time.as_ref()).map(|t| t.0);
    pod_priority(b)
        .cmp(&pod_priority(a))
        .then_with(|| match (start(a), start(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

/// Find the smallest set of lower-priority pods to evict from `node` so
/// that `pod` fits. Returns `None` when evicting all of them is not enough.
pub fn select_victims_on_node(
    predicates: &[Arc<dyn FilterPredicate>],
    pod: &v1::Pod,
    node: &NodeInfo,
    nominated: &[Arc<v1::Pod>],
) -> Result<Option<Victims>> {
    let priority = pod_priority(pod);
    let mut trial = node.clone();

    let mut potential: Vec<Arc<v1::Pod>> = node
        .pods()
        .filter(|p| pod_priority(p) < priority)
        .cloned()
        .collect();
    for victim in &potential {
        trial.remove_pod(&PodKey::from_v1(victim)?);
    }

    if !pod_fits_on_node(predicates, pod, &trial, nominated)?.fits {
        debug!("Pod does not fit on {} even without lower-priority pods", node.name());
        return Ok(None);
    }

    potential.sort_by(|a, b| more_important(a, b));

    let mut victims = Victims::default();
    for candidate in potential {
        trial.add_pod(candidate.clone())?;
        if !pod_fits_on_node(predicates, pod, &trial, nominated)?.fits {
            trial.remove_pod(&PodKey::from_v1(&candidate)?);
            victims.pods.push(candidate);
        }
    }

    Ok(Some(victims))
}

/// Pick the node whose victims cause the least disruption
pub fn pick_one_node_for_preemption(candidates: &BTreeMap<String, Victims>) -> Option<String> {
    if let Some((name, _)) = candidates.iter().find(|(_, v)| v.pods.is_empty()) {
        return Some(name.clone());
    }

    candidates
        .iter()
        .min_by(|(_, a), (_, b)| {
            a.num_pdb_violations
                .cmp(&b.num_pdb_violations)
                .then_with(|| a.highest_priority().cmp(&b.highest_priority()))
                .then_with(|| a.offset_priority_sum().cmp(&b.offset_priority_sum()))
                .then_with(|| a.pods.len().cmp(&b.pods.len()))
        })
        .map(|(name, _)| name.clone())
}
