// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Simulation run error type
#[derive(Error, Debug, Diagnostic)]
pub enum SimulatorError {
    /// The simulation config is malformed or inconsistent
    #[error("Invalid simulation config: {message}")]
    #[diagnostic(
        code(kubesim::sim::invalid_config),
        help("Check the config file against sample-config.yaml. Quantities must be quoted strings such as cpu: \"2\"")
    )]
    InvalidConfig {
        #[allow(unused)]
        message: String,
    },

    /// The run was cancelled before it finished
    #[error("Simulation cancelled at {clock}")]
    #[diagnostic(
        code(kubesim::sim::cancelled),
        help("The run was interrupted. Metrics written so far are complete up to this clock")
    )]
    Cancelled {
        #[allow(unused)]
        clock: String,
    },

    /// Reading config or writing metrics failed
    #[error("I/O error on {path}: {message}")]
    #[diagnostic(
        code(kubesim::sim::io_error),
        help("Verify that the path exists and is readable or writable by the current user")
    )]
    Io {
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<std::io::Error>,
    },

    /// A submitter failed to produce events
    #[error("Submitter {submitter} failed: {message}")]
    #[diagnostic(
        code(kubesim::sim::submitter_failed),
        help("Check the submitter's workload definition")
    )]
    SubmitterFailed {
        #[allow(unused)]
        submitter: String,
        #[allow(unused)]
        message: String,
    },

    /// Core model error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] kubesim_core::CoreError),

    /// Scheduling error
    #[error(transparent)]
    #[diagnostic(transparent)]
    SchedulerError(#[from] kubesim_scheduler::SchedulerError),

    /// Internal error
    #[error("Internal simulator error: {message}")]
    #[diagnostic(
        code(kubesim::sim::internal_error),
        help("This is likely a bug in kubesim-sim. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for simulation operations
pub type Result<T> = std::result::Result<T, SimulatorError>;

impl SimulatorError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn cancelled(clock: impl Into<String>) -> Self {
        Self::Cancelled {
            clock: clock.into(),
        }
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub fn submitter_failed(submitter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SubmitterFailed {
            submitter: submitter.into(),
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
