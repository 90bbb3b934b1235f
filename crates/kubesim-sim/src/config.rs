use crate::error::{Result, SimulatorError};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1;
use kubesim_core::{Clock, Node};
use kubesim_scheduler::{QueueKind, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

fn default_tick() -> i64 {
    10
}

fn default_metrics_tick() -> u64 {
    1
}

/// Reference to a pod by namespace and name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

/// What a workload entry does when its time comes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkloadAction {
    /// Submit a pod
    Pod(Box<v1::Pod>),
    /// Delete a queued or bound pod
    Delete(PodRef),
}

/// A scripted workload step, `at` seconds after the start clock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadEntry {
    pub at: i64,
    #[serde(flatten)]
    pub action: WorkloadAction,
}

/// Simulation configuration, loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    /// Simulated seconds per tick
    #[serde(default = "default_tick")]
    pub tick: i64,

    /// Clock of the first tick; the wall clock when absent
    #[serde(default)]
    pub start_clock: Option<DateTime<Utc>>,

    /// Ticks between metrics snapshots
    #[serde(default = "default_metrics_tick")]
    pub metrics_tick: u64,

    /// Files receiving one JSON metrics line per snapshot
    #[serde(default)]
    pub metrics_file: Vec<PathBuf>,

    #[serde(default)]
    pub metrics_stdout: bool,

    /// Log filter used when RUST_LOG is not set
    #[serde(default)]
    pub log_level: Option<String>,

    /// Nodes of the simulated cluster
    #[serde(default)]
    pub cluster: Vec<v1::Node>,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub workload: Vec<WorkloadEntry>,
}

impl SimulationConfig {
    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| SimulatorError::io(path.display().to_string(), e))?;
        Self::from_yaml(&data)
    }

    /// Parse and validate a config document
    pub fn from_yaml(data: &str) -> Result<Self> {
        let config: SimulationConfig = serde_yaml::from_str(data)
            .map_err(|e| SimulatorError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick <= 0 {
            return Err(SimulatorError::invalid_config(format!(
                "tick must be positive, got {}",
                self.tick
            )));
        }
        if self.metrics_tick == 0 {
            return Err(SimulatorError::invalid_config("metricsTick must be positive"));
        }
        if self.scheduler.parallelism == 0 {
            return Err(SimulatorError::invalid_config(
                "scheduler.parallelism must be positive",
            ));
        }
        if self.scheduler.preemption && self.scheduler.queue == QueueKind::Fifo {
            return Err(SimulatorError::invalid_config(
                "scheduler.preemption requires the priority queue",
            ));
        }

        let start = self.start();
        let in_range = |seconds: i64| {
            chrono::Duration::try_seconds(seconds)
                .and_then(|offset| start.checked_add(offset))
                .is_some()
        };
        if !in_range(self.tick) {
            return Err(SimulatorError::invalid_config(format!(
                "tick {} is out of range",
                self.tick
            )));
        }

        let mut names = BTreeSet::new();
        for node in &self.cluster {
            let node = Node::new(node.clone())
                .map_err(|e| SimulatorError::invalid_config(format!("cluster: {}", e)))?;
            if !names.insert(node.name().to_string()) {
                return Err(SimulatorError::invalid_config(format!(
                    "cluster: duplicate node {}",
                    node.name()
                )));
            }
        }

        if let Some(entry) = self.workload.iter().find(|e| e.at < 0) {
            return Err(SimulatorError::invalid_config(format!(
                "workload: negative offset {}",
                entry.at
            )));
        }
        if let Some(entry) = self.workload.iter().find(|e| !in_range(e.at)) {
            return Err(SimulatorError::invalid_config(format!(
                "workload: offset {} is out of range",
                entry.at
            )));
        }
        Ok(())
    }

    /// Clock of the first tick
    pub fn start(&self) -> Clock {
        self.start_clock.map(Clock::new).unwrap_or_else(Clock::now)
    }

    pub fn tick_duration(&self) -> Result<chrono::Duration> {
        chrono::Duration::try_seconds(self.tick).ok_or_else(|| {
            SimulatorError::invalid_config(format!("tick {} is out of range", self.tick))
        })
    }
}
