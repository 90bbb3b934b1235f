use crate::error::{CoreError, Result};
use k8s_openapi::api::core::v1;
use serde::{Deserialize, Serialize};
use std::fmt;

/// PodKey uniquely identifies a pod within the simulated cluster
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PodKey {
    /// Pod namespace
    pub namespace: String,
    /// Pod name
    pub name: String,
}

impl PodKey {
    /// Create a new PodKey
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a Kubernetes pod; both namespace and name must be set
    pub fn from_v1(pod: &v1::Pod) -> Result<Self> {
        let name = pod
            .metadata
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| CoreError::missing_field("metadata.name"))?;
        let namespace = pod
            .metadata
            .namespace
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| CoreError::missing_field("metadata.namespace"))?;

        Ok(Self::new(namespace, name))
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Name of a Kubernetes node, required for every simulated node
pub fn node_name(node: &v1::Node) -> Result<&str> {
    node.metadata
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| CoreError::missing_field("metadata.name"))
}

/// Declared priority of a pod, zero when unset
pub fn pod_priority(pod: &v1::Pod) -> i32 {
    pod.spec.as_ref().and_then(|s| s.priority).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_key_from_v1() {
        let mut pod = v1::Pod::default();
        pod.metadata.name = Some("nginx".to_string());
        pod.metadata.namespace = Some("default".to_string());

        let key = PodKey::from_v1(&pod).unwrap();
        assert_eq!(key, PodKey::new("default", "nginx"));
        assert_eq!(key.to_string(), "default/nginx");
    }

    #[test]
    fn test_pod_key_requires_namespace() {
        let mut pod = v1::Pod::default();
        pod.metadata.name = Some("nginx".to_string());

        let err = PodKey::from_v1(&pod).unwrap_err();
        assert!(matches!(err, CoreError::MissingField { .. }));
    }

    #[test]
    fn test_pod_priority_default() {
        let pod = v1::Pod::default();
        assert_eq!(pod_priority(&pod), 0);
    }
}
