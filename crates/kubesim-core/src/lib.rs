//! Kubesim Core - the simulated cluster model
//!
//! This crate provides:
//! - A simulated clock
//! - Resource vectors and Kubernetes quantity parsing
//! - Simulated pods driven by phased resource usage
//! - Simulated nodes with admission checks and garbage collection
//! - Error types with miette diagnostics

pub mod clock;
pub mod error;
pub mod node;
pub mod pod;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use clock::Clock;
pub use error::{CoreError, Result};
pub use node::{node_allocatable, pod_capacity, Node, NodeMetrics};
pub use pod::{Phase, Pod, PodMetrics, PodStatus, SimSpec};
pub use resources::ResourceVector;
pub use types::{node_name, pod_priority, PodKey};

// Re-export k8s-openapi for downstream crates
pub use k8s_openapi;

/// Deserialize a Kubernetes object from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        CoreError::internal_error(format!("Failed to deserialize from YAML: {}", e))
    })
}
