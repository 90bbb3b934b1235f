// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use crate::types::FitError;
use miette::Diagnostic;
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// The pending queue holds no pods
    #[error("Pending pod queue is empty")]
    #[diagnostic(
        code(scheduler::empty_queue),
        help("Check is_empty() before popping, or treat this as the end of a pass")
    )]
    EmptyQueue,

    /// No queued pod has the given key
    #[error("No pending pod matches {pod}")]
    #[diagnostic(
        code(scheduler::no_matching_pod),
        help("The pod may already have been scheduled or deleted")
    )]
    NoMatchingPod {
        #[allow(unused)]
        pod: String,
    },

    /// An update tried to change the identity of a queued pod
    #[error("Cannot replace pod {expected} with pod {actual}")]
    #[diagnostic(
        code(scheduler::different_identity),
        help("An update must keep the namespace and name of the pod it replaces")
    )]
    DifferentIdentity {
        #[allow(unused)]
        expected: String,
        #[allow(unused)]
        actual: String,
    },

    /// A pod without a usable namespace/name was handed to the queue
    #[error("Invalid pod key: {reason}")]
    #[diagnostic(
        code(scheduler::invalid_key),
        help("Set metadata.namespace and metadata.name on every pod")
    )]
    InvalidKey {
        #[allow(unused)]
        reason: String,
    },

    /// The cluster has no nodes to schedule onto
    #[error("No nodes available to schedule pods")]
    #[diagnostic(
        code(scheduler::no_nodes_available),
        help("Add at least one node to the cluster")
    )]
    NoNodesAvailable,

    /// No node fits the pod
    #[error("{0}")]
    #[diagnostic(
        code(scheduler::unschedulable),
        help("Check node resources, taints, and pod requirements")
    )]
    Unschedulable(Box<FitError>),

    /// A filter predicate failed to evaluate
    #[error("Predicate {predicate} failed on node {node}: {message}")]
    #[diagnostic(
        code(scheduler::predicate_failed),
        help("Check the pod and node objects the predicate reads")
    )]
    PredicateFailed {
        #[allow(unused)]
        predicate: String,
        #[allow(unused)]
        node: String,
        #[allow(unused)]
        message: String,
    },

    /// A score function failed to evaluate
    #[error("Priority {priority} failed: {message}")]
    #[diagnostic(
        code(scheduler::score_failed),
        help("Check the pod and node objects the priority function reads")
    )]
    ScoreFailed {
        #[allow(unused)]
        priority: String,
        #[allow(unused)]
        message: String,
    },

    /// A non-ignorable extender returned an error
    #[error("Extender {extender} failed: {message}")]
    #[diagnostic(
        code(scheduler::extender_failed),
        help("Fix the extender, or mark it ignorable to skip it on errors")
    )]
    ExtenderFailed {
        #[allow(unused)]
        extender: String,
        #[allow(unused)]
        message: String,
    },

    /// Several parallel operations failed
    #[error("{} scheduling operations failed", .errors.len())]
    #[diagnostic(
        code(scheduler::aggregate),
        help("See the related errors for each individual failure")
    )]
    Aggregate {
        #[related]
        errors: Vec<SchedulerError>,
    },

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(
        code(scheduler::core_error),
        help("A pod or node object could not be interpreted")
    )]
    CoreError(#[from] kubesim_core::CoreError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(scheduler::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Create a NoMatchingPod error
    pub fn no_matching_pod(pod: impl Into<String>) -> Self {
        Self::NoMatchingPod { pod: pod.into() }
    }

    /// Create a DifferentIdentity error
    pub fn different_identity(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::DifferentIdentity {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an InvalidKey error
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Create an Unschedulable error
    pub fn unschedulable(fit_error: FitError) -> Self {
        Self::Unschedulable(Box::new(fit_error))
    }

    /// Create a PredicateFailed error
    pub fn predicate_failed(
        predicate: impl Into<String>,
        node: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::PredicateFailed {
            predicate: predicate.into(),
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create a ScoreFailed error
    pub fn score_failed(priority: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ScoreFailed {
            priority: priority.into(),
            message: message.into(),
        }
    }

    /// Create an ExtenderFailed error
    pub fn extender_failed(extender: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExtenderFailed {
            extender: extender.into(),
            message: message.into(),
        }
    }

    /// Collapse a batch of errors: a single error is returned as is
    pub fn aggregate(mut errors: Vec<SchedulerError>) -> Self {
        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }
        Self::Aggregate { errors }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
