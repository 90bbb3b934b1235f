//! Simulated pods and their phased resource usage.
//!
//! A pod's lifetime is described by its `simSpec` annotation: an ordered list
//! of phases, each with a duration and a constant resource usage. Once bound
//! to a node at `bound_at`, every observable property of the pod is a pure
//! function of the simulated clock.

use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::resources::ResourceVector;
use crate::types::{pod_priority, PodKey};
use chrono::Duration;
use k8s_openapi::api::core::v1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Annotation carrying the YAML phase list of a simulated pod
pub const SIM_SPEC_ANNOTATION: &str = "simSpec";

/// Grace period applied when a pod does not declare one
pub const DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS: i64 = 30;

/// A contiguous interval during which a pod's resource usage is constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    /// Duration of the phase in seconds
    pub seconds: i32,
    /// Resource usage while the phase is active
    pub resource_usage: ResourceVector,
}

impl Phase {
    pub fn new(seconds: i32, resource_usage: ResourceVector) -> Self {
        Self {
            seconds,
            resource_usage,
        }
    }
}

/// Ordered phase list of a simulated pod
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimSpec(Vec<Phase>);

impl SimSpec {
    /// Build a spec, rejecting negative durations
    pub fn new(phases: Vec<Phase>) -> std::result::Result<Self, String> {
        if let Some(phase) = phases.iter().find(|p| p.seconds < 0) {
            return Err(format!("phase duration {}s is negative", phase.seconds));
        }
        Ok(Self(phases))
    }

    /// Parse the `simSpec` annotation of a Kubernetes pod
    pub fn from_pod(pod: &v1::Pod) -> Result<Self> {
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let raw = pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(SIM_SPEC_ANNOTATION))
            .ok_or_else(|| {
                CoreError::invalid_sim_spec(&pod_name, "missing simSpec annotation")
            })?;

        let phases: Vec<Phase> = serde_yaml::from_str(raw)
            .map_err(|e| CoreError::invalid_sim_spec(&pod_name, e.to_string()))?;

        Self::new(phases).map_err(|reason| CoreError::invalid_sim_spec(&pod_name, reason))
    }

    /// Render as the YAML stored in the `simSpec` annotation
    pub fn to_annotation(&self) -> Result<String> {
        serde_yaml::to_string(&self.0).map_err(|e| {
            CoreError::internal_error(format!("Failed to serialize sim spec: {}", e))
        })
    }

    pub fn phases(&self) -> &[Phase] {
        &self.0
    }

    /// Natural lifetime: the sum of all phase durations
    pub fn total_duration(&self) -> Duration {
        Duration::seconds(self.0.iter().map(|p| i64::from(p.seconds)).sum())
    }

    /// Phase active at `elapsed`; a boundary belongs to the later phase
    pub fn phase_at(&self, elapsed: Duration) -> Option<&Phase> {
        let mut end = Duration::zero();
        for phase in &self.0 {
            end = end + Duration::seconds(i64::from(phase.seconds));
            if end > elapsed {
                return Some(phase);
            }
        }
        None
    }
}

/// Binding status of a simulated pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodStatus {
    /// Admitted by the node
    Ok,
    /// Deletion requested; the grace period is running or over
    Deleted,
    /// Rejected by the node's admission check; never runs
    OverCapacity,
}

impl fmt::Display for PodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodStatus::Ok => write!(f, "Ok"),
            PodStatus::Deleted => write!(f, "Deleted"),
            PodStatus::OverCapacity => write!(f, "OverCapacity"),
        }
    }
}

/// Sum of container resource requests of a Kubernetes pod
pub fn resource_request(pod: &v1::Pod) -> Result<ResourceVector> {
    sum_container_resources(pod, |r| r.requests.as_ref())
}

/// Sum of container resource limits of a Kubernetes pod
pub fn resource_limit(pod: &v1::Pod) -> Result<ResourceVector> {
    sum_container_resources(pod, |r| r.limits.as_ref())
}

fn sum_container_resources<F>(pod: &v1::Pod, select: F) -> Result<ResourceVector>
where
    F: Fn(&v1::ResourceRequirements) -> Option<&BTreeMap<String, Quantity>>,
{
    let mut total = ResourceVector::new();
    let containers = pod.spec.as_ref().map(|s| s.containers.as_slice()).unwrap_or(&[]);

    for container in containers {
        if let Some(list) = container.resources.as_ref().and_then(&select) {
            total += &ResourceVector::from_quantities(list)?;
        }
    }

    Ok(total)
}

/// Check everything the simulator needs from a submitted pod: a key, a
/// parseable sim spec and parseable resource lists.
pub fn validate(pod: &v1::Pod) -> Result<()> {
    PodKey::from_v1(pod)?;
    SimSpec::from_pod(pod)?;
    resource_request(pod)?;
    resource_limit(pod)?;
    Ok(())
}

/// Snapshot of a pod for metrics output
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodMetrics {
    pub resource_request: ResourceVector,
    pub resource_limit: ResourceVector,
    pub resource_usage: ResourceVector,
    pub bound_at: Clock,
    pub node: String,
    pub executed_seconds: i64,
    pub priority: i32,
    pub status: PodStatus,
}

/// A pod bound to a simulated node
#[derive(Debug, Clone)]
pub struct Pod {
    v1: v1::Pod,
    key: PodKey,
    spec: SimSpec,
    request: ResourceVector,
    limit: ResourceVector,
    bound_at: Clock,
    status: PodStatus,
    node: String,
    deletion_timestamp: Option<Clock>,
}

impl Pod {
    /// Create a bound pod; fails if the Kubernetes object is not a valid
    /// simulated pod.
    pub fn new(
        v1: v1::Pod,
        bound_at: Clock,
        status: PodStatus,
        node: impl Into<String>,
    ) -> Result<Self> {
        let key = PodKey::from_v1(&v1)?;
        let spec = SimSpec::from_pod(&v1)?;
        let request = resource_request(&v1)?;
        let limit = resource_limit(&v1)?;

        Ok(Self {
            v1,
            key,
            spec,
            request,
            limit,
            bound_at,
            status,
            node: node.into(),
            deletion_timestamp: None,
        })
    }

    pub fn key(&self) -> &PodKey {
        &self.key
    }

    /// The Kubernetes object as submitted
    pub fn v1(&self) -> &v1::Pod {
        &self.v1
    }

    pub fn sim_spec(&self) -> &SimSpec {
        &self.spec
    }

    pub fn bound_at(&self) -> Clock {
        self.bound_at
    }

    pub fn status(&self) -> PodStatus {
        self.status
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn deletion_timestamp(&self) -> Option<Clock> {
        self.deletion_timestamp
    }

    pub fn priority(&self) -> i32 {
        pod_priority(&self.v1)
    }

    pub fn resource_request(&self) -> &ResourceVector {
        &self.request
    }

    pub fn resource_limit(&self) -> &ResourceVector {
        &self.limit
    }

    fn elapsed(&self, clock: Clock) -> Duration {
        clock - self.bound_at
    }

    fn grace_period(&self) -> Duration {
        let seconds = self
            .v1
            .spec
            .as_ref()
            .and_then(|s| s.termination_grace_period_seconds)
            .unwrap_or(DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS);
        Duration::seconds(seconds)
    }

    /// The phase list has run to its end
    fn is_finished(&self, clock: Clock) -> bool {
        self.elapsed(clock) >= self.spec.total_duration()
    }

    pub fn is_running(&self, clock: Clock) -> bool {
        self.status == PodStatus::Ok
            && self.elapsed(clock) >= Duration::zero()
            && !self.is_finished(clock)
    }

    /// Deletion was requested and the grace period has not yet elapsed
    pub fn is_terminating(&self, clock: Clock) -> bool {
        self.status == PodStatus::Deleted && !self.is_finished(clock) && !self.is_deleted(clock)
    }

    /// The grace period after a deletion request has elapsed
    pub fn is_deleted(&self, clock: Clock) -> bool {
        match (self.status, self.deletion_timestamp) {
            (PodStatus::Deleted, Some(deleted_at)) => clock - deleted_at >= self.grace_period(),
            _ => false,
        }
    }

    /// Completed naturally or removed after deletion
    pub fn is_terminated(&self, clock: Clock) -> bool {
        self.is_finished(clock) || self.is_deleted(clock)
    }

    /// Rejected at admission and still within its natural lifetime
    pub fn is_failed(&self, clock: Clock) -> bool {
        self.status == PodStatus::OverCapacity && !self.is_finished(clock)
    }

    /// Resource usage at `clock`; zero unless the pod is running
    pub fn resource_usage_at(&self, clock: Clock) -> Result<ResourceVector> {
        if !self.is_running(clock) {
            return Ok(ResourceVector::new());
        }

        self.spec
            .phase_at(self.elapsed(clock))
            .map(|phase| phase.resource_usage.clone())
            .ok_or_else(|| {
                CoreError::internal_error(format!(
                    "pod {} is running at {} but has no active phase",
                    self.key, clock
                ))
            })
    }

    /// Seconds the pod has spent executing as of `clock`
    pub fn executed_seconds(&self, clock: Clock) -> i64 {
        let end = match (self.status, self.deletion_timestamp) {
            (PodStatus::OverCapacity, _) => return 0,
            (PodStatus::Deleted, Some(deleted_at)) => deleted_at.min(clock),
            _ => clock,
        };
        let executed = (end - self.bound_at).min(self.spec.total_duration());
        executed.num_seconds().max(0)
    }

    /// Request deletion; the pod keeps its resources until the grace period
    /// ends. No-op once terminated or already deleted. Returns whether this
    /// call started the deletion.
    pub fn delete(&mut self, clock: Clock) -> bool {
        if self.status == PodStatus::Deleted || self.is_terminated(clock) {
            return false;
        }
        self.status = PodStatus::Deleted;
        self.deletion_timestamp = Some(clock);
        true
    }

    /// Kubernetes view of the pod at `clock`
    pub fn to_v1(&self, clock: Clock) -> v1::Pod {
        let mut pod = self.v1.clone();

        pod.spec
            .get_or_insert_with(Default::default)
            .node_name = Some(self.node.clone());
        pod.metadata.deletion_timestamp = self.deletion_timestamp.map(|t| t.to_k8s_time());

        let phase = if self.is_running(clock) || self.is_terminating(clock) {
            "Running"
        } else if self.status == PodStatus::Ok && self.is_finished(clock) {
            "Succeeded"
        } else {
            "Failed"
        };

        let status = pod.status.get_or_insert_with(Default::default);
        status.phase = Some(phase.to_string());
        status.start_time = Some(self.bound_at.to_k8s_time());
        status.nominated_node_name = None;

        pod
    }

    pub fn metrics(&self, clock: Clock) -> Result<PodMetrics> {
        Ok(PodMetrics {
            resource_request: self.request.clone(),
            resource_limit: self.limit.clone(),
            resource_usage: self.resource_usage_at(clock)?,
            bound_at: self.bound_at,
            node: self.node.clone(),
            executed_seconds: self.executed_seconds(clock),
            priority: self.priority(),
            status: self.status,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::resources::{RESOURCE_CPU, RESOURCE_MEMORY};
    use chrono::{TimeZone, Utc};

    pub(crate) fn t0() -> Clock {
        Clock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    pub(crate) fn create_test_pod(name: &str, cpu: &str, sim_spec: &str) -> v1::Pod {
        let mut pod = v1::Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod.metadata.annotations = Some(BTreeMap::from([(
            SIM_SPEC_ANNOTATION.to_string(),
            sim_spec.to_string(),
        )]));

        let container = v1::Container {
            name: "main".to_string(),
            resources: Some(v1::ResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "cpu".to_string(),
                    Quantity(cpu.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        };
        pod.spec = Some(v1::PodSpec {
            containers: vec![container],
            ..Default::default()
        });
        pod
    }

    const TWO_PHASES: &str = r#"
- seconds: 5
  resourceUsage:
    cpu: "1"
    memory: "1Gi"
- seconds: 10
  resourceUsage:
    cpu: "2"
"#;

    #[test]
    fn test_sim_spec_parse() {
        let pod = create_test_pod("p", "1", TWO_PHASES);
        let spec = SimSpec::from_pod(&pod).unwrap();

        assert_eq!(spec.phases().len(), 2);
        assert_eq!(spec.total_duration(), Duration::seconds(15));
        assert_eq!(spec.phases()[0].resource_usage.get(RESOURCE_CPU), 1000);
    }

    #[test]
    fn test_sim_spec_missing_or_invalid() {
        let mut pod = create_test_pod("p", "1", TWO_PHASES);
        pod.metadata.annotations = None;
        assert!(matches!(
            SimSpec::from_pod(&pod),
            Err(CoreError::InvalidSimSpec { .. })
        ));

        let pod = create_test_pod("p", "1", "- seconds: -1\n  resourceUsage: {}\n");
        assert!(SimSpec::from_pod(&pod).is_err());

        let pod = create_test_pod("p", "1", "- seconds: 1\n  resourceUsage:\n    cpu: \"x\"\n");
        assert!(SimSpec::from_pod(&pod).is_err());
    }

    #[test]
    fn test_phase_lookup() {
        let pod = create_test_pod("p", "1", TWO_PHASES);
        let pod = Pod::new(pod, t0(), PodStatus::Ok, "node-1").unwrap();

        let at3 = pod.resource_usage_at(t0() + Duration::seconds(3)).unwrap();
        assert_eq!(at3.get(RESOURCE_CPU), 1000);
        assert_eq!(at3.get(RESOURCE_MEMORY), 1024 * 1024 * 1024 * 1000);

        // The boundary belongs to the second phase
        let at5 = pod.resource_usage_at(t0() + Duration::seconds(5)).unwrap();
        assert_eq!(at5.get(RESOURCE_CPU), 2000);
        assert_eq!(at5.get(RESOURCE_MEMORY), 0);

        let at15 = t0() + Duration::seconds(15);
        assert!(pod.resource_usage_at(at15).unwrap().is_zero());
        assert!(pod.is_terminated(at15));
        assert!(!pod.is_running(at15));
        assert!(pod.is_running(t0() + Duration::seconds(14)));
    }

    #[test]
    fn test_over_capacity_never_runs() {
        let pod = create_test_pod("p", "1", TWO_PHASES);
        let pod = Pod::new(pod, t0(), PodStatus::OverCapacity, "node-1").unwrap();

        for s in 0..20 {
            let clock = t0() + Duration::seconds(s);
            assert!(!pod.is_running(clock));
            assert!(pod.resource_usage_at(clock).unwrap().is_zero());
        }
        assert!(pod.is_failed(t0() + Duration::seconds(3)));
        assert!(!pod.is_failed(t0() + Duration::seconds(15)));
        assert!(pod.is_terminated(t0() + Duration::seconds(15)));
        assert_eq!(pod.executed_seconds(t0() + Duration::seconds(10)), 0);
    }

    #[test]
    fn test_delete_grace_period() {
        let mut v1 = create_test_pod("p", "1", TWO_PHASES);
        v1.spec.as_mut().unwrap().termination_grace_period_seconds = Some(4);
        let mut pod = Pod::new(v1, t0(), PodStatus::Ok, "node-1").unwrap();

        let deleted_at = t0() + Duration::seconds(2);
        pod.delete(deleted_at);

        assert_eq!(pod.status(), PodStatus::Deleted);
        assert!(!pod.is_running(deleted_at));
        assert!(pod.is_terminating(deleted_at));
        assert!(pod.is_terminating(deleted_at + Duration::seconds(3)));
        assert!(!pod.is_deleted(deleted_at + Duration::seconds(3)));
        assert!(pod.is_deleted(deleted_at + Duration::seconds(4)));
        assert!(pod.is_terminated(deleted_at + Duration::seconds(4)));
        assert_eq!(pod.executed_seconds(deleted_at + Duration::seconds(4)), 2);

        // A second delete keeps the original timestamp
        assert!(!pod.delete(deleted_at + Duration::seconds(1)));
        assert_eq!(pod.deletion_timestamp(), Some(deleted_at));
    }

    #[test]
    fn test_delete_after_completion_is_noop() {
        let pod = create_test_pod("p", "1", TWO_PHASES);
        let mut pod = Pod::new(pod, t0(), PodStatus::Ok, "node-1").unwrap();

        assert!(!pod.delete(t0() + Duration::seconds(20)));
        assert_eq!(pod.status(), PodStatus::Ok);
        assert!(pod.deletion_timestamp().is_none());
    }

    #[test]
    fn test_default_grace_period() {
        let pod = create_test_pod("p", "1", TWO_PHASES);
        let mut pod = Pod::new(pod, t0(), PodStatus::Ok, "node-1").unwrap();
        pod.delete(t0());

        let almost = t0() + Duration::seconds(DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS - 1);
        // Natural completion at 15s ends termination before the grace period does
        assert!(pod.is_terminating(t0() + Duration::seconds(14)));
        assert!(!pod.is_deleted(almost));
        assert!(pod.is_terminated(almost));
    }

    #[test]
    fn test_to_v1() {
        let pod = create_test_pod("p", "1", TWO_PHASES);
        let pod = Pod::new(pod, t0(), PodStatus::Ok, "node-1").unwrap();

        let running = pod.to_v1(t0() + Duration::seconds(1));
        assert_eq!(running.spec.unwrap().node_name.as_deref(), Some("node-1"));
        assert_eq!(running.status.unwrap().phase.as_deref(), Some("Running"));

        let done = pod.to_v1(t0() + Duration::seconds(15));
        assert_eq!(done.status.unwrap().phase.as_deref(), Some("Succeeded"));
    }

    #[test]
    fn test_resource_request_sums_containers() {
        let mut pod = create_test_pod("p", "500m", TWO_PHASES);
        let second = pod.spec.as_ref().unwrap().containers[0].clone();
        pod.spec.as_mut().unwrap().containers.push(second);

        let request = resource_request(&pod).unwrap();
        assert_eq!(request.get(RESOURCE_CPU), 1000);
        assert!(resource_limit(&pod).unwrap().is_zero());
        assert!(validate(&pod).is_ok());
    }

    #[test]
    fn test_metrics() {
        let pod = create_test_pod("p", "1", TWO_PHASES);
        let pod = Pod::new(pod, t0(), PodStatus::Ok, "node-1").unwrap();

        let metrics = pod.metrics(t0() + Duration::seconds(7)).unwrap();
        assert_eq!(metrics.executed_seconds, 7);
        assert_eq!(metrics.resource_usage.get(RESOURCE_CPU), 2000);
        assert_eq!(metrics.status, PodStatus::Ok);

        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["resourceRequest"]["cpu"], "1");
        assert_eq!(json["node"], "node-1");
    }
}
