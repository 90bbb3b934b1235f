//! Builders for simulated pods and nodes used across the simulator tests

use k8s_openapi::api::core::v1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kubesim_core::pod::SIM_SPEC_ANNOTATION;
use kubesim_core::Clock;
use std::collections::BTreeMap;

pub(crate) fn t0() -> Clock {
    use chrono::{TimeZone, Utc};
    Clock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
}

pub(crate) fn create_test_node(name: &str, cpu: &str) -> v1::Node {
    let mut node = v1::Node::default();
    node.metadata.name = Some(name.to_string());
    node.status = Some(v1::NodeStatus {
        allocatable: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity("8Gi".to_string())),
        ])),
        ..Default::default()
    });
    node
}

/// A pod requesting `cpu` that runs one phase of `seconds` at that usage
pub(crate) fn create_test_pod(name: &str, cpu: &str, priority: i32, seconds: i32) -> v1::Pod {
    let mut pod = v1::Pod::default();
    pod.metadata.name = Some(name.to_string());
    pod.metadata.namespace = Some("default".to_string());
    pod.metadata.annotations = Some(BTreeMap::from([(
        SIM_SPEC_ANNOTATION.to_string(),
        format!(
            "- seconds: {}\n  resourceUsage:\n    cpu: \"{}\"\n",
            seconds, cpu
        ),
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
        priority: Some(priority),
        ..Default::default()
    });
    pod
}
