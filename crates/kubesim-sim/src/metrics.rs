use crate::error::{Result, SimulatorError};
use kubesim_core::{Clock, Node, NodeMetrics, PodMetrics};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    pub pending_pods_num: usize,
}

/// Snapshot of the whole cluster at one clock
#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub clock: Clock,
    /// Node name to node metrics
    pub nodes: BTreeMap<String, NodeMetrics>,
    /// `namespace/name` to pod metrics, for every pod still held by a node
    pub pods: BTreeMap<String, PodMetrics>,
    pub queue: QueueMetrics,
}

impl Metrics {
    pub fn collect(clock: Clock, nodes: &BTreeMap<String, Node>, pending: usize) -> Result<Self> {
        let mut node_metrics = BTreeMap::new();
        let mut pod_metrics = BTreeMap::new();

        for (name, node) in nodes {
            node_metrics.insert(name.clone(), node.metrics(clock)?);
            for pod in node.pods() {
                pod_metrics.insert(pod.key().to_string(), pod.metrics(clock)?);
            }
        }

        Ok(Self {
            clock,
            nodes: node_metrics,
            pods: pod_metrics,
            queue: QueueMetrics {
                pending_pods_num: pending,
            },
        })
    }

    /// One-line JSON form
    pub fn to_json_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            SimulatorError::internal_error(format!("Failed to serialize metrics: {}", e))
        })
    }
}

/// Sink for metrics snapshots
pub trait MetricsWriter: Send {
    fn write(&mut self, metrics: &Metrics) -> Result<()>;
}

/// Appends one JSON line per snapshot to a file
pub struct FileWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl FileWriter {
    /// Create or truncate the file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .map_err(|e| SimulatorError::io(path.display().to_string(), e))?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }
}

impl MetricsWriter for FileWriter {
    fn write(&mut self, metrics: &Metrics) -> Result<()> {
        let line = metrics.to_json_line()?;
        writeln!(self.out, "{}", line)
            .and_then(|_| self.out.flush())
            .map_err(|e| SimulatorError::io(self.path.display().to_string(), e))
    }
}

/// Prints one JSON line per snapshot to stdout
pub struct StdoutWriter;

impl MetricsWriter for StdoutWriter {
    fn write(&mut self, metrics: &Metrics) -> Result<()> {
        let line = metrics.to_json_line()?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line).map_err(|e| SimulatorError::io("stdout", e))
    }
}
