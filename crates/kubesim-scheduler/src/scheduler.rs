use crate::config::HostSelection;
use crate::extender::{Extender, ExtenderArgs};
use crate::filter::{pod_fits_on_node, FilterPredicate};
use crate::parallel::{parallelize, DEFAULT_PARALLELISM};
use crate::preemption::{
    nodes_where_preemption_might_help, pick_one_node_for_preemption,
    pod_eligible_to_preempt_others, select_victims_on_node, Victims,
};
use crate::queue::{PodQueue, POD_SCHEDULED};
use crate::score::ScoreFunction;
use crate::types::{FailureReason, FitError, NodeInfo, ScoreResult};
use crate::{Result, SchedulerError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1;
use kubesim_core::{pod_priority, Clock, PodKey};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a scheduling pass, applied to the cluster by the caller
#[derive(Debug, Clone)]
pub enum SchedulingEvent {
    /// Bind the pod to the node
    Bind { pod: v1::Pod, node_name: String },
    /// Delete a pod to make room for a preemptor
    Delete {
        namespace: String,
        name: String,
        node_name: String,
    },
}

/// Assigns queued pods to nodes
#[async_trait]
pub trait Scheduler: Send {
    /// Run one scheduling pass over the queue.
    ///
    /// `nodes` must reflect the pods currently holding resources; bound pods
    /// are added to it as the pass goes.
    async fn schedule(
        &mut self,
        clock: Clock,
        queue: &mut dyn PodQueue,
        nodes: &mut BTreeMap<String, Arc<NodeInfo>>,
    ) -> Result<Vec<SchedulingEvent>>;
}

/// A score function and its weight in the total score
#[derive(Clone)]
pub struct WeightedPriority {
    pub function: Arc<dyn ScoreFunction>,
    pub weight: i64,
}

/// Pods nominated to each node that the pod being scheduled must respect
type NominatedPods = HashMap<String, Vec<Arc<v1::Pod>>>;

/// Filter, score and select scheduler with optional preemption
pub struct GenericScheduler {
    predicates: Vec<Arc<dyn FilterPredicate>>,
    priorities: Vec<WeightedPriority>,
    extenders: Vec<Arc<dyn Extender>>,
    preemption_enabled: bool,
    host_selection: HostSelection,
    parallelism: usize,
    last_node_index: u64,
}

impl Default for GenericScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl GenericScheduler {
    /// A scheduler with no plugins; every node fits and scores the same
    pub fn new() -> Self {
        Self {
            predicates: Vec::new(),
            priorities: Vec::new(),
            extenders: Vec::new(),
            preemption_enabled: false,
            host_selection: HostSelection::RoundRobin,
            parallelism: DEFAULT_PARALLELISM,
            last_node_index: 0,
        }
    }

    pub fn with_predicate(mut self, predicate: Arc<dyn FilterPredicate>) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn with_priority(mut self, function: Arc<dyn ScoreFunction>, weight: i64) -> Self {
        self.priorities.push(WeightedPriority { function, weight });
        self
    }

    pub fn with_extender(mut self, extender: Arc<dyn Extender>) -> Self {
        self.extenders.push(extender);
        self
    }

    pub fn with_preemption(mut self, enabled: bool) -> Self {
        self.preemption_enabled = enabled;
        self
    }

    pub fn with_host_selection(mut self, host_selection: HostSelection) -> Self {
        self.host_selection = host_selection;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn predicate_names(&self) -> Vec<&str> {
        self.predicates.iter().map(|p| p.name()).collect()
    }

    /// Pick a node for a single pod
    async fn schedule_pod(
        &mut self,
        pod: &v1::Pod,
        queue: &dyn PodQueue,
        nodes: &BTreeMap<String, Arc<NodeInfo>>,
    ) -> Result<String> {
        let key = PodKey::from_v1(pod)?;
        let nominated = nominated_pods_by_node(pod, queue, nodes)?;

        let (mut feasible, mut failed) = self.find_nodes_that_fit(pod, nodes, nominated).await?;
        if !feasible.is_empty() {
            feasible = self.filter_with_extenders(pod, feasible, &mut failed).await?;
        }

        debug!("Pod {} has {} feasible nodes", key, feasible.len());

        match feasible.as_slice() {
            [] => Err(SchedulerError::unschedulable(FitError {
                pod: key,
                num_all_nodes: nodes.len(),
                failed_predicates: failed,
            })),
            [only] => Ok(only.name().to_string()),
            _ => {
                let scores = self.prioritize_nodes(pod, &feasible).await?;
                self.select_host(&scores)
            }
        }
    }

    /// Run the predicates against every node
    async fn find_nodes_that_fit(
        &self,
        pod: &v1::Pod,
        nodes: &BTreeMap<String, Arc<NodeInfo>>,
        nominated: NominatedPods,
    ) -> Result<(Vec<Arc<NodeInfo>>, BTreeMap<String, Vec<FailureReason>>)> {
        let predicates = self.predicates.clone();
        let pod = Arc::new(pod.clone());
        let items: Vec<Arc<NodeInfo>> = nodes.values().cloned().collect();

        let results = parallelize(self.parallelism, items, move |node| {
            let nominated = nominated
                .get(node.name())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let result = pod_fits_on_node(&predicates, &pod, &node, nominated)?;
            Ok((node, result))
        })
        .await?;

        let mut feasible = Vec::new();
        let mut failed = BTreeMap::new();
        for (node, result) in results {
            if result.fits {
                feasible.push(node);
            } else {
                failed.insert(node.name().to_string(), result.reasons);
            }
        }
        Ok((feasible, failed))
    }

    /// Pass the feasible nodes through every interested extender in order
    async fn filter_with_extenders(
        &self,
        pod: &v1::Pod,
        mut feasible: Vec<Arc<NodeInfo>>,
        failed: &mut BTreeMap<String, Vec<FailureReason>>,
    ) -> Result<Vec<Arc<NodeInfo>>> {
        for extender in &self.extenders {
            if feasible.is_empty() {
                break;
            }
            if !extender.is_interested(pod) {
                continue;
            }

            let args = ExtenderArgs::new(pod, &feasible, extender.is_node_cache_capable());
            let outcome = match extender.filter(args).await {
                Ok(result) => match result.error.as_deref().filter(|e| !e.is_empty()) {
                    Some(error) => Err(SchedulerError::extender_failed(extender.name(), error)),
                    None => Ok(result),
                },
                Err(e) => Err(SchedulerError::extender_failed(extender.name(), e.to_string())),
            };

            let result = match outcome {
                Ok(result) => result,
                Err(e) if extender.is_ignorable() => {
                    warn!("Skipping ignorable extender {}: {}", extender.name(), e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            for (node_name, reason) in &result.failed_nodes {
                failed
                    .entry(node_name.clone())
                    .or_default()
                    .push(FailureReason::Extender {
                        extender: extender.name().to_string(),
                        reason: reason.clone(),
                    });
            }

            let passed: HashSet<String> = result.passed().into_iter().collect();
            feasible.retain(|node| passed.contains(node.name()));
        }
        Ok(feasible)
    }

    /// Weighted score of every feasible node, in the order given
    async fn prioritize_nodes(
        &self,
        pod: &v1::Pod,
        feasible: &[Arc<NodeInfo>],
    ) -> Result<Vec<ScoreResult>> {
        if self.priorities.is_empty() && self.extenders.is_empty() {
            return Ok(feasible
                .iter()
                .map(|node| ScoreResult::new(node.name(), 1))
                .collect());
        }

        let pod = Arc::new(pod.clone());
        let nodes: Arc<Vec<Arc<NodeInfo>>> = Arc::new(feasible.to_vec());
        let functions: Arc<Vec<Arc<dyn ScoreFunction>>> =
            Arc::new(self.priorities.iter().map(|p| p.function.clone()).collect());
        let node_count = nodes.len();

        // Map: one task per (function, node)
        let items: Vec<(usize, usize)> = (0..functions.len())
            .flat_map(|f| (0..node_count).map(move |n| (f, n)))
            .collect();
        let mapped = {
            let (functions, nodes, pod) = (functions.clone(), nodes.clone(), pod.clone());
            parallelize(self.parallelism, items, move |(f, n)| {
                let function = &functions[f];
                function
                    .score(&pod, &nodes[n])
                    .map_err(|e| SchedulerError::score_failed(function.name(), e.to_string()))
            })
            .await?
        };

        // Reduce: one task per function, seeing every node's score
        let per_function: Vec<(usize, Vec<i64>)> = (0..functions.len())
            .map(|f| (f, mapped[f * node_count..(f + 1) * node_count].to_vec()))
            .collect();
        let reduced = {
            let (functions, nodes, pod) = (functions.clone(), nodes.clone(), pod.clone());
            parallelize(functions.len(), per_function, move |(f, mut scores)| {
                let function = &functions[f];
                function
                    .reduce(&pod, &nodes, &mut scores)
                    .map_err(|e| SchedulerError::score_failed(function.name(), e.to_string()))?;
                Ok(scores)
            })
            .await?
        };

        let mut totals = vec![0i64; node_count];
        for (priority, scores) in self.priorities.iter().zip(&reduced) {
            for (total, score) in totals.iter_mut().zip(scores) {
                *total += priority.weight * score;
            }
        }

        let index: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.name(), i))
            .collect();
        for extender in &self.extenders {
            if !extender.is_interested(&pod) {
                continue;
            }
            let args = ExtenderArgs::new(&pod, &nodes, extender.is_node_cache_capable());
            match extender.prioritize(args).await {
                Ok(priorities) => {
                    for host in priorities {
                        if let Some(&i) = index.get(host.host.as_str()) {
                            totals[i] += host.score * extender.weight();
                        }
                    }
                }
                Err(e) if extender.is_ignorable() => {
                    warn!("Skipping ignorable extender {}: {}", extender.name(), e);
                }
                Err(e) => {
                    return Err(SchedulerError::extender_failed(extender.name(), e.to_string()))
                }
            }
        }

        Ok(nodes
            .iter()
            .zip(totals)
            .map(|(node, score)| {
                debug!("Node {} total score: {}", node.name(), score);
                ScoreResult::new(node.name(), score)
            })
            .collect())
    }

    /// Choose among the nodes with the highest score
    fn select_host(&mut self, scores: &[ScoreResult]) -> Result<String> {
        let max = scores
            .iter()
            .map(|s| s.score)
            .max()
            .ok_or_else(|| SchedulerError::internal_error("No nodes scored"))?;
        let best: Vec<&ScoreResult> = scores.iter().filter(|s| s.score == max).collect();

        let chosen = match self.host_selection {
            HostSelection::RoundRobin => {
                let i = (self.last_node_index % best.len() as u64) as usize;
                self.last_node_index += 1;
                best[i]
            }
            HostSelection::LastMax => best[best.len() - 1],
        };
        Ok(chosen.node_name.clone())
    }

    /// Try to make room for an unschedulable pod by evicting lower-priority
    /// pods. Returns a Delete event per victim.
    async fn preempt(
        &self,
        pod: &v1::Pod,
        fit_error: &FitError,
        queue: &mut dyn PodQueue,
        nodes: &BTreeMap<String, Arc<NodeInfo>>,
    ) -> Result<Vec<SchedulingEvent>> {
        let key = PodKey::from_v1(pod)?;
        if !pod_eligible_to_preempt_others(pod, nodes) {
            debug!(
                "Pod {} waits for terminating pods on its nominated node",
                key
            );
            return Ok(Vec::new());
        }

        let candidates = nodes_where_preemption_might_help(nodes, fit_error);
        let nominated = nominated_pods_by_node(pod, &*queue, nodes)?;
        let selected = {
            let predicates = self.predicates.clone();
            let pod = Arc::new(pod.clone());
            parallelize(self.parallelism, candidates, move |node| {
                let nominated = nominated
                    .get(node.name())
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let victims = select_victims_on_node(&predicates, &pod, &node, nominated)?;
                Ok((node.name().to_string(), victims))
            })
            .await?
        };

        let mut candidates: BTreeMap<String, Victims> = selected
            .into_iter()
            .filter_map(|(name, victims)| victims.map(|v| (name, v)))
            .collect();

        let Some(node_name) = pick_one_node_for_preemption(&candidates) else {
            debug!("No node where preemption helps pod {}", key);
            queue.remove_nominated_node(pod)?;
            return Ok(Vec::new());
        };
        let victims = candidates.remove(&node_name).unwrap_or_default();

        queue.update_nominated_node(pod, &node_name)?;
        info!(
            "Pod {} preempts {} pod(s) on node {}",
            key,
            victims.pods.len(),
            node_name
        );

        let mut events = Vec::with_capacity(victims.pods.len());
        for victim in &victims.pods {
            let victim_key = PodKey::from_v1(victim)?;
            info!("Preempting pod {} on node {}", victim_key, node_name);
            events.push(SchedulingEvent::Delete {
                namespace: victim_key.namespace,
                name: victim_key.name,
                node_name: node_name.clone(),
            });
        }

        // Lower-priority pods nominated here lose their claim
        let priority = pod_priority(pod);
        for other in queue.nominated_pods(&node_name) {
            if pod_priority(&other) < priority {
                queue.remove_nominated_node(&other)?;
            }
        }

        Ok(events)
    }
}

#[async_trait]
impl Scheduler for GenericScheduler {
    async fn schedule(
        &mut self,
        clock: Clock,
        queue: &mut dyn PodQueue,
        nodes: &mut BTreeMap<String, Arc<NodeInfo>>,
    ) -> Result<Vec<SchedulingEvent>> {
        let mut events = Vec::new();
        if queue.is_empty() {
            return Ok(events);
        }
        if nodes.is_empty() {
            return Err(SchedulerError::NoNodesAvailable);
        }

        while !queue.is_empty() {
            let pod = queue.front()?;
            let key = PodKey::from_v1(&pod)?;

            match self.schedule_pod(&pod, &*queue, nodes).await {
                Ok(node_name) => {
                    queue.pop()?;
                    queue.remove_nominated_node(&pod)?;

                    let mut bound = (*pod).clone();
                    set_pod_scheduled(&mut bound, clock, None);
                    bound.spec.get_or_insert_with(Default::default).node_name =
                        Some(node_name.clone());
                    if let Some(status) = bound.status.as_mut() {
                        status.nominated_node_name = None;
                    }

                    let node = nodes.get_mut(&node_name).ok_or_else(|| {
                        SchedulerError::internal_error(format!("Selected unknown node {}", node_name))
                    })?;
                    Arc::make_mut(node).add_pod(Arc::new(bound.clone()))?;

                    info!("Bound pod {} to node {}", key, node_name);
                    events.push(SchedulingEvent::Bind {
                        pod: bound,
                        node_name,
                    });
                }
                Err(SchedulerError::Unschedulable(fit_error)) => {
                    info!("{}", fit_error);

                    let mut pending = (*pod).clone();
                    set_pod_scheduled(&mut pending, clock, Some(fit_error.to_string()));
                    queue.update(&key, pending.clone())?;

                    if self.preemption_enabled {
                        if queue.supports_nomination() {
                            events.extend(self.preempt(&pending, &fit_error, queue, nodes).await?);
                        } else {
                            debug!("Queue cannot nominate, pod {} does not preempt", key);
                        }
                    }
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(events)
    }
}

/// Pods nominated to each node with a priority at least that of `pod`,
/// excluding `pod` itself
fn nominated_pods_by_node(
    pod: &v1::Pod,
    queue: &dyn PodQueue,
    nodes: &BTreeMap<String, Arc<NodeInfo>>,
) -> Result<NominatedPods> {
    let key = PodKey::from_v1(pod)?;
    let priority = pod_priority(pod);

    let mut nominated = HashMap::new();
    for name in nodes.keys() {
        let mut pods = Vec::new();
        for other in queue.nominated_pods(name) {
            if pod_priority(&other) >= priority && PodKey::from_v1(&other)? != key {
                pods.push(other);
            }
        }
        if !pods.is_empty() {
            nominated.insert(name.clone(), pods);
        }
    }
    Ok(nominated)
}

/// Record the outcome of a scheduling attempt in the pod's `PodScheduled`
/// condition. `unschedulable` carries the failure message, if any.
fn set_pod_scheduled(pod: &mut v1::Pod, clock: Clock, unschedulable: Option<String>) {
    let status = if unschedulable.is_some() { "False" } else { "True" };
    let now = clock.to_k8s_time();

    let conditions = pod
        .status
        .get_or_insert_with(Default::default)
        .conditions
        .get_or_insert_with(Vec::new);

    let transitioned = conditions
        .iter()
        .find(|c| c.type_ == POD_SCHEDULED && c.status == status)
        .and_then(|c| c.last_transition_time.clone())
        .unwrap_or_else(|| now.clone());
    conditions.retain(|c| c.type_ != POD_SCHEDULED);

    conditions.push(v1::PodCondition {
        type_: POD_SCHEDULED.to_string(),
        status: status.to_string(),
        last_probe_time: Some(now),
        last_transition_time: Some(transitioned),
        reason: unschedulable.as_ref().map(|_| "Unschedulable".to_string()),
        message: unschedulable,
        ..Default::default()
    });
}
