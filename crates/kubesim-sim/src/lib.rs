//! Kubesim Sim - the discrete-time simulation loop
//!
//! This crate provides:
//! - YAML simulation config (cluster, scheduler, workload, metrics)
//! - The tick loop driving submitters, the scheduler and the nodes
//! - Submitters, including the scripted workload replay
//! - Metrics snapshots and their writers

pub mod config;
pub mod error;
pub mod metrics;
pub mod simulator;
pub mod submitter;
pub mod workload;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use config::{PodRef, SimulationConfig, WorkloadAction, WorkloadEntry};
pub use error::{Result, SimulatorError};
pub use metrics::{FileWriter, Metrics, MetricsWriter, QueueMetrics, StdoutWriter};
pub use simulator::{RunSummary, Simulator};
pub use submitter::{NodeLister, Submitter, SubmitterEvent};
pub use workload::ScriptedSubmitter;
