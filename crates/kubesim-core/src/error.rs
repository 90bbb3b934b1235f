// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for the simulated cluster model
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    /// A resource quantity string could not be parsed
    #[error("Invalid quantity '{value}': {reason}")]
    #[diagnostic(
        code(kubesim::invalid_quantity),
        help("Use a Kubernetes quantity such as '500m', '2', '1.5', '128Mi' or '1Gi'")
    )]
    InvalidQuantity {
        #[allow(unused)]
        value: String,
        #[allow(unused)]
        reason: String,
    },

    /// A pod's phased usage spec is missing or malformed
    #[error("Invalid sim spec for pod {pod}: {reason}")]
    #[diagnostic(
        code(kubesim::invalid_sim_spec),
        help("Annotate the pod with 'simSpec': a YAML list of {{seconds, resourceUsage}} phases")
    )]
    InvalidSimSpec {
        #[allow(unused)]
        pod: String,
        #[allow(unused)]
        reason: String,
    },

    /// Required field is missing from a Kubernetes object
    #[error("Missing required field: {field}")]
    #[diagnostic(
        code(kubesim::missing_field),
        help("Set {field} on the object before handing it to the simulator")
    )]
    MissingField {
        #[allow(unused)]
        field: String,
    },

    /// A pod with the same key is already bound to the node
    #[error("Pod {pod} is already bound to node {node}")]
    #[diagnostic(
        code(kubesim::pod_already_bound),
        help("Delete the existing pod first, or submit the pod under a different name")
    )]
    PodAlreadyBound {
        #[allow(unused)]
        pod: String,
        #[allow(unused)]
        node: String,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(kubesim::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create an InvalidQuantity error
    pub fn invalid_quantity(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidSimSpec error
    pub fn invalid_sim_spec(pod: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSimSpec {
            pod: pod.into(),
            reason: reason.into(),
        }
    }

    /// Create a MissingField error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create a PodAlreadyBound error
    pub fn pod_already_bound(pod: impl Into<String>, node: impl Into<String>) -> Self {
        Self::PodAlreadyBound {
            pod: pod.into(),
            node: node.into(),
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
