use crate::error::{Result, SchedulerError};
use crate::types::{FailureReason, FilterResult, NodeInfo};
use k8s_openapi::api::core::v1;
use kubesim_core::pod::resource_request;
use kubesim_core::resources::RESOURCE_PODS;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub const TAINT_EFFECT_NO_SCHEDULE: &str = "NoSchedule";
pub const TAINT_EFFECT_NO_EXECUTE: &str = "NoExecute";
pub const TAINT_EFFECT_PREFER_NO_SCHEDULE: &str = "PreferNoSchedule";

/// Taint carried by cordoned nodes
pub const TAINT_NODE_UNSCHEDULABLE: &str = "node.kubernetes.io/unschedulable";

/// Filter predicate trait
pub trait FilterPredicate: Send + Sync {
    /// Decide whether `node` can host `pod`
    fn filter(&self, pod: &v1::Pod, node: &NodeInfo) -> Result<FilterResult>;

    /// Name of the filter
    fn name(&self) -> &str;
}

/// Run predicates in order; the first rejection wins
pub fn run_predicates(
    predicates: &[Arc<dyn FilterPredicate>],
    pod: &v1::Pod,
    node: &NodeInfo,
) -> Result<FilterResult> {
    for predicate in predicates {
        let result = predicate.filter(pod, node).map_err(|e| {
            SchedulerError::predicate_failed(predicate.name(), node.name(), e.to_string())
        })?;
        if !result.fits {
            debug!(
                "Node {} filtered out by {}: {:?}",
                node.name(),
                predicate.name(),
                result.reasons
            );
            return Ok(result);
        }
    }
    Ok(FilterResult::fit())
}

/// Check a pod against a node, honoring pods nominated onto the node.
///
/// `nominated` holds the pods of equal or higher priority nominated to the
/// node. When present, the pod must fit both with them added and without
/// them.
pub fn pod_fits_on_node(
    predicates: &[Arc<dyn FilterPredicate>],
    pod: &v1::Pod,
    node: &NodeInfo,
    nominated: &[Arc<v1::Pod>],
) -> Result<FilterResult> {
    if !nominated.is_empty() {
        let mut with_nominated = node.clone();
        for nominated_pod in nominated {
            with_nominated.add_pod(nominated_pod.clone())?;
        }
        let result = run_predicates(predicates, pod, &with_nominated)?;
        if !result.fits {
            return Ok(result);
        }
    }
    run_predicates(predicates, pod, node)
}

/// Whether a toleration matches a taint
pub fn toleration_matches(toleration: &v1::Toleration, taint: &v1::Taint) -> bool {
    if let Some(effect) = toleration.effect.as_deref().filter(|e| !e.is_empty()) {
        if effect != taint.effect {
            return false;
        }
    }

    let key = toleration.key.as_deref().unwrap_or("");
    match toleration.operator.as_deref().unwrap_or("Equal") {
        // An empty key with Exists tolerates everything
        "Exists" => key.is_empty() || key == taint.key,
        "Equal" => {
            key == taint.key
                && toleration.value.as_deref().unwrap_or("") == taint.value.as_deref().unwrap_or("")
        }
        _ => false,
    }
}

/// Whether any toleration of the pod matches the taint
pub fn tolerates(pod: &v1::Pod, taint: &v1::Taint) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.tolerations.as_ref())
        .map(|tolerations| tolerations.iter().any(|t| toleration_matches(t, taint)))
        .unwrap_or(false)
}

pub(crate) fn node_taints(node: &v1::Node) -> &[v1::Taint] {
    node.spec
        .as_ref()
        .and_then(|s| s.taints.as_deref())
        .unwrap_or(&[])
}

/// Filter for pod count and every requested resource
pub struct PodFitsResources;

impl FilterPredicate for PodFitsResources {
    fn filter(&self, pod: &v1::Pod, node: &NodeInfo) -> Result<FilterResult> {
        let mut reasons = Vec::new();

        if let Some(capacity) = node.allowed_pod_number() {
            if node.pod_count() as i64 + 1 > capacity {
                reasons.push(FailureReason::TooManyPods { capacity });
            }
        }

        let request = resource_request(pod)?;
        let allocatable = node.allocatable();
        let used = node.requested();

        for (resource, requested) in request.iter() {
            if requested <= 0 || resource == RESOURCE_PODS {
                continue;
            }
            let capacity = allocatable.get(resource);
            if used.get(resource) + requested > capacity {
                debug!(
                    "Node {} lacks {}: requested {}, used {}, allocatable {}",
                    node.name(),
                    resource,
                    requested,
                    used.get(resource),
                    capacity
                );
                reasons.push(FailureReason::InsufficientResource {
                    resource: resource.to_string(),
                    requested,
                    used: used.get(resource),
                    capacity,
                });
            }
        }

        if reasons.is_empty() {
            Ok(FilterResult::fit())
        } else {
            Ok(FilterResult::fail(reasons))
        }
    }

    fn name(&self) -> &str {
        "PodFitsResources"
    }
}

/// Filter for node selector and required node affinity
pub struct MatchNodeSelector;

impl MatchNodeSelector {
    fn selector_matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
        selector.iter().all(|(key, value)| labels.get(key) == Some(value))
    }

    fn requirement_matches(
        requirement: &v1::NodeSelectorRequirement,
        labels: &BTreeMap<String, String>,
    ) -> bool {
        let label = labels.get(&requirement.key);
        let values = requirement.values.as_deref().unwrap_or(&[]);
        let as_number = |s: &str| s.parse::<i64>().ok();

        match requirement.operator.as_str() {
            "In" => label.is_some_and(|l| values.contains(l)),
            "NotIn" => !label.is_some_and(|l| values.contains(l)),
            "Exists" => label.is_some(),
            "DoesNotExist" => label.is_none(),
            "Gt" | "Lt" => {
                let (Some(label), [bound]) = (label, values) else {
                    return false;
                };
                match (as_number(label.as_str()), as_number(bound.as_str())) {
                    (Some(l), Some(b)) if requirement.operator == "Gt" => l > b,
                    (Some(l), Some(b)) => l < b,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Terms are ORed; requirements within a term are ANDed
    fn affinity_matches(selector: &v1::NodeSelector, labels: &BTreeMap<String, String>) -> bool {
        selector.node_selector_terms.iter().any(|term| {
            let expressions = term.match_expressions.as_deref().unwrap_or(&[]);
            !expressions.is_empty()
                && expressions
                    .iter()
                    .all(|r| Self::requirement_matches(r, labels))
        })
    }
}

impl FilterPredicate for MatchNodeSelector {
    fn filter(&self, pod: &v1::Pod, node: &NodeInfo) -> Result<FilterResult> {
        let Some(spec) = pod.spec.as_ref() else {
            return Ok(FilterResult::fit());
        };
        let empty = BTreeMap::new();
        let labels = node.node().metadata.labels.as_ref().unwrap_or(&empty);

        if let Some(selector) = &spec.node_selector {
            if !Self::selector_matches(selector, labels) {
                return Ok(FilterResult::fail(vec![FailureReason::NodeSelectorMismatch]));
            }
        }

        let required = spec
            .affinity
            .as_ref()
            .and_then(|a| a.node_affinity.as_ref())
            .and_then(|a| a.required_during_scheduling_ignored_during_execution.as_ref());
        if let Some(required) = required {
            if !Self::affinity_matches(required, labels) {
                return Ok(FilterResult::fail(vec![FailureReason::NodeSelectorMismatch]));
            }
        }

        Ok(FilterResult::fit())
    }

    fn name(&self) -> &str {
        "MatchNodeSelector"
    }
}

/// Filter for NoSchedule and NoExecute taints
pub struct PodToleratesNodeTaints;

impl FilterPredicate for PodToleratesNodeTaints {
    fn filter(&self, pod: &v1::Pod, node: &NodeInfo) -> Result<FilterResult> {
        let untolerated = node_taints(node.node()).iter().find(|taint| {
            (taint.effect == TAINT_EFFECT_NO_SCHEDULE || taint.effect == TAINT_EFFECT_NO_EXECUTE)
                && !tolerates(pod, taint)
        });

        match untolerated {
            Some(taint) => Ok(FilterResult::fail(vec![FailureReason::TaintNotTolerated {
                taint: format!("{}:{}", taint.key, taint.effect),
            }])),
            None => Ok(FilterResult::fit()),
        }
    }

    fn name(&self) -> &str {
        "PodToleratesNodeTaints"
    }
}

/// Filter for cordoned nodes
pub struct CheckNodeUnschedulable;

impl FilterPredicate for CheckNodeUnschedulable {
    fn filter(&self, pod: &v1::Pod, node: &NodeInfo) -> Result<FilterResult> {
        let unschedulable = node
            .node()
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false);
        if !unschedulable {
            return Ok(FilterResult::fit());
        }

        let cordon = v1::Taint {
            key: TAINT_NODE_UNSCHEDULABLE.to_string(),
            effect: TAINT_EFFECT_NO_SCHEDULE.to_string(),
            ..Default::default()
        };
        if tolerates(pod, &cordon) {
            Ok(FilterResult::fit())
        } else {
            Ok(FilterResult::fail(vec![FailureReason::NodeUnschedulable]))
        }
    }

    fn name(&self) -> &str {
        "CheckNodeUnschedulable"
    }
}

/// Filter for node conditions. A node without conditions is assumed ready.
pub struct CheckNodeReady;

impl FilterPredicate for CheckNodeReady {
    fn filter(&self, _pod: &v1::Pod, node: &NodeInfo) -> Result<FilterResult> {
        let conditions = node
            .node()
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_deref())
            .unwrap_or(&[]);

        let not_ready = conditions.iter().any(|c| {
            (c.type_ == "Ready" && c.status != "True")
                || (c.type_ == "NetworkUnavailable" && c.status == "True")
        });

        if not_ready {
            Ok(FilterResult::fail(vec![FailureReason::NodeNotReady]))
        } else {
            Ok(FilterResult::fit())
        }
    }

    fn name(&self) -> &str {
        "CheckNodeReady"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_node, create_test_pod};

    fn node_info(node: v1::Node) -> NodeInfo {
        NodeInfo::new(node).unwrap()
    }

    fn taint(key: &str, effect: &str) -> v1::Taint {
        v1::Taint {
            key: key.to_string(),
            effect: effect.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_fits_resources_pass() {
        let node = node_info(create_test_node("node1", "4", None));
        let pod = create_test_pod("test-pod", "1", 0);

        let result = PodFitsResources.filter(&pod, &node).unwrap();
        assert!(result.fits);
    }

    #[test]
    fn test_pod_fits_resources_counts_existing_pods() {
        let node = NodeInfo::with_pods(
            create_test_node("node1", "4", None),
            vec![create_test_pod("existing", "3", 0)],
        )
        .unwrap();
        let pod = create_test_pod("test-pod", "2", 0);

        let result = PodFitsResources.filter(&pod, &node).unwrap();
        assert!(!result.fits);
        assert_eq!(
            result.reasons,
            vec![FailureReason::InsufficientResource {
                resource: "cpu".to_string(),
                requested: 2000,
                used: 3000,
                capacity: 4000,
            }]
        );
        assert!(result.reasons[0].is_resolvable_by_preemption());
    }

    #[test]
    fn test_pod_fits_resources_unknown_resource() {
        let node = node_info(create_test_node("node1", "4", None));
        let mut pod = create_test_pod("test-pod", "1", 0);
        pod.spec.as_mut().unwrap().containers[0]
            .resources
            .as_mut()
            .unwrap()
            .requests
            .as_mut()
            .unwrap()
            .insert(
                "nvidia.com/gpu".to_string(),
                k8s_openapi::apimachinery::pkg::api::resource::Quantity("1".to_string()),
            );

        let result = PodFitsResources.filter(&pod, &node).unwrap();
        assert!(!result.fits);
        assert_eq!(result.reasons[0].to_string(), "Insufficient nvidia.com/gpu");
    }

    #[test]
    fn test_pod_fits_resources_too_many_pods() {
        let node = NodeInfo::with_pods(
            create_test_node("node1", "4", Some("1")),
            vec![create_test_pod("existing", "0", 0)],
        )
        .unwrap();

        let result = PodFitsResources
            .filter(&create_test_pod("test-pod", "1", 0), &node)
            .unwrap();
        assert_eq!(result.reasons, vec![FailureReason::TooManyPods { capacity: 1 }]);
    }

    #[test]
    fn test_match_node_selector() {
        let mut node = create_test_node("node1", "4", None);
        node.metadata.labels = Some(BTreeMap::from([(
            "disktype".to_string(),
            "ssd".to_string(),
        )]));
        let node = node_info(node);

        let mut pod = create_test_pod("test-pod", "1", 0);
        assert!(MatchNodeSelector.filter(&pod, &node).unwrap().fits);

        pod.spec.as_mut().unwrap().node_selector = Some(BTreeMap::from([(
            "disktype".to_string(),
            "hdd".to_string(),
        )]));
        let result = MatchNodeSelector.filter(&pod, &node).unwrap();
        assert_eq!(result.reasons, vec![FailureReason::NodeSelectorMismatch]);

        pod.spec.as_mut().unwrap().node_selector = Some(BTreeMap::from([(
            "disktype".to_string(),
            "ssd".to_string(),
        )]));
        assert!(MatchNodeSelector.filter(&pod, &node).unwrap().fits);
    }

    #[test]
    fn test_match_node_affinity() {
        let mut node = create_test_node("node1", "4", None);
        node.metadata.labels = Some(BTreeMap::from([("cores".to_string(), "8".to_string())]));
        let node = node_info(node);

        let affinity = |operator: &str, values: &[&str]| v1::Affinity {
            node_affinity: Some(v1::NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(v1::NodeSelector {
                    node_selector_terms: vec![v1::NodeSelectorTerm {
                        match_expressions: Some(vec![v1::NodeSelectorRequirement {
                            key: "cores".to_string(),
                            operator: operator.to_string(),
                            values: Some(values.iter().map(|v| v.to_string()).collect()),
                        }]),
                        ..Default::default()
                    }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut pod = create_test_pod("test-pod", "1", 0);
        for (operator, values, fits) in [
            ("In", vec!["4", "8"], true),
            ("NotIn", vec!["8"], false),
            ("Gt", vec!["4"], true),
            ("Lt", vec!["4"], false),
            ("Exists", vec![], true),
        ] {
            pod.spec.as_mut().unwrap().affinity = Some(affinity(operator, values.as_slice()));
            assert_eq!(
                MatchNodeSelector.filter(&pod, &node).unwrap().fits,
                fits,
                "operator {}",
                operator
            );
        }
    }

    #[test]
    fn test_taint_toleration() {
        let mut node = create_test_node("node1", "4", None);
        node.spec = Some(v1::NodeSpec {
            taints: Some(vec![
                taint("dedicated", TAINT_EFFECT_NO_SCHEDULE),
                taint("soft", TAINT_EFFECT_PREFER_NO_SCHEDULE),
            ]),
            ..Default::default()
        });
        let node = node_info(node);

        let mut pod = create_test_pod("test-pod", "1", 0);
        let result = PodToleratesNodeTaints.filter(&pod, &node).unwrap();
        assert!(!result.fits);
        assert!(matches!(
            result.reasons[0],
            FailureReason::TaintNotTolerated { .. }
        ));

        pod.spec.as_mut().unwrap().tolerations = Some(vec![v1::Toleration {
            key: Some("dedicated".to_string()),
            operator: Some("Exists".to_string()),
            ..Default::default()
        }]);
        assert!(PodToleratesNodeTaints.filter(&pod, &node).unwrap().fits);
    }

    #[test]
    fn test_toleration_matches() {
        let mut taint = taint("team", TAINT_EFFECT_NO_EXECUTE);
        taint.value = Some("a".to_string());

        let equal = v1::Toleration {
            key: Some("team".to_string()),
            value: Some("a".to_string()),
            ..Default::default()
        };
        assert!(toleration_matches(&equal, &taint));

        let wrong_value = v1::Toleration {
            value: Some("b".to_string()),
            ..equal.clone()
        };
        assert!(!toleration_matches(&wrong_value, &taint));

        let wrong_effect = v1::Toleration {
            effect: Some(TAINT_EFFECT_NO_SCHEDULE.to_string()),
            ..equal
        };
        assert!(!toleration_matches(&wrong_effect, &taint));

        let everything = v1::Toleration {
            operator: Some("Exists".to_string()),
            ..Default::default()
        };
        assert!(toleration_matches(&everything, &taint));
    }

    #[test]
    fn test_check_node_unschedulable() {
        let mut node = create_test_node("node1", "4", None);
        node.spec = Some(v1::NodeSpec {
            unschedulable: Some(true),
            ..Default::default()
        });
        let node = node_info(node);

        let mut pod = create_test_pod("test-pod", "1", 0);
        let result = CheckNodeUnschedulable.filter(&pod, &node).unwrap();
        assert_eq!(result.reasons, vec![FailureReason::NodeUnschedulable]);

        pod.spec.as_mut().unwrap().tolerations = Some(vec![v1::Toleration {
            key: Some(TAINT_NODE_UNSCHEDULABLE.to_string()),
            operator: Some("Exists".to_string()),
            effect: Some(TAINT_EFFECT_NO_SCHEDULE.to_string()),
            ..Default::default()
        }]);
        assert!(CheckNodeUnschedulable.filter(&pod, &node).unwrap().fits);
    }

    #[test]
    fn test_pod_fits_on_node_with_nominated_pods() {
        let predicates: Vec<Arc<dyn FilterPredicate>> = vec![Arc::new(PodFitsResources)];
        let node = node_info(create_test_node("node1", "4", None));
        let pod = create_test_pod("test-pod", "2", 0);

        assert!(pod_fits_on_node(&predicates, &pod, &node, &[]).unwrap().fits);

        // A nominated pod holds room on the node
        let nominated = vec![Arc::new(create_test_pod("nominated", "3", 10))];
        let result = pod_fits_on_node(&predicates, &pod, &node, &nominated).unwrap();
        assert!(!result.fits);
    }

    #[test]
    fn test_predicate_errors_name_the_predicate() {
        let predicates: Vec<Arc<dyn FilterPredicate>> = vec![Arc::new(PodFitsResources)];
        let node = node_info(create_test_node("node1", "4", None));
        let mut pod = create_test_pod("test-pod", "2", 0);
        pod.spec.as_mut().unwrap().containers[0]
            .resources
            .as_mut()
            .unwrap()
            .requests = Some(BTreeMap::from([(
            "cpu".to_string(),
            k8s_openapi::apimachinery::pkg::api::resource::Quantity("lots".to_string()),
        )]));

        let err = run_predicates(&predicates, &pod, &node).unwrap_err();
        assert!(matches!(err, SchedulerError::PredicateFailed { .. }));
    }

    #[test]
    fn test_check_node_ready() {
        let pod = create_test_pod("test-pod", "1", 0);
        let node = node_info(create_test_node("node1", "4", None));
        assert!(CheckNodeReady.filter(&pod, &node).unwrap().fits);

        let mut not_ready = create_test_node("node2", "4", None);
        not_ready.status.as_mut().unwrap().conditions = Some(vec![v1::NodeCondition {
            type_: "Ready".to_string(),
            status: "False".to_string(),
            ..Default::default()
        }]);
        let result = CheckNodeReady.filter(&pod, &node_info(not_ready)).unwrap();
        assert_eq!(result.reasons, vec![FailureReason::NodeNotReady]);
    }
}
