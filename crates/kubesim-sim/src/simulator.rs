use crate::config::SimulationConfig;
use crate::error::{Result, SimulatorError};
use crate::metrics::{FileWriter, Metrics, MetricsWriter, StdoutWriter};
use crate::submitter::{Submitter, SubmitterEvent};
use crate::workload::ScriptedSubmitter;
use k8s_openapi::api::core::v1;
use kubesim_core::pod::validate;
use kubesim_core::{Clock, Node, PodKey};
use kubesim_scheduler::{NodeInfo, PodQueue, Scheduler, SchedulingEvent};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Totals of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub pods_submitted: usize,
    pub pods_rejected: usize,
    pub pods_bound: usize,
    pub pods_preempted: usize,
}

/// Discrete-time simulation of a cluster and its scheduler
pub struct Simulator {
    clock: Clock,
    tick: chrono::Duration,
    metrics_tick: u64,
    nodes: BTreeMap<String, Node>,
    queue: Box<dyn PodQueue>,
    scheduler: Box<dyn Scheduler>,
    submitters: Vec<Box<dyn Submitter>>,
    writers: Vec<Box<dyn MetricsWriter>>,
    summary: RunSummary,
}

impl Simulator {
    /// Build a simulator from a validated config, with the scripted
    /// workload as its submitter and the configured metrics writers
    pub fn from_config(config: &SimulationConfig) -> Result<Self> {
        config.validate()?;

        let start = config.start();
        let mut simulator = Self::new(
            start,
            config.tick_duration()?,
            config.metrics_tick,
            config.scheduler.build_queue(),
            Box::new(config.scheduler.build_scheduler()),
        );

        for node in &config.cluster {
            simulator.add_node(node.clone())?;
        }

        simulator = simulator.with_submitter(Box::new(ScriptedSubmitter::new(
            start,
            config.workload.clone(),
        )));

        for path in &config.metrics_file {
            simulator = simulator.with_writer(Box::new(FileWriter::create(path)?));
        }
        if config.metrics_stdout {
            simulator = simulator.with_writer(Box::new(StdoutWriter));
        }

        Ok(simulator)
    }

    /// An empty cluster with no submitters or writers
    pub fn new(
        start: Clock,
        tick: chrono::Duration,
        metrics_tick: u64,
        queue: Box<dyn PodQueue>,
        scheduler: Box<dyn Scheduler>,
    ) -> Self {
        Self {
            clock: start,
            tick,
            metrics_tick: metrics_tick.max(1),
            nodes: BTreeMap::new(),
            queue,
            scheduler,
            submitters: Vec::new(),
            writers: Vec::new(),
            summary: RunSummary::default(),
        }
    }

    pub fn with_submitter(mut self, submitter: Box<dyn Submitter>) -> Self {
        self.submitters.push(submitter);
        self
    }

    pub fn with_writer(mut self, writer: Box<dyn MetricsWriter>) -> Self {
        self.writers.push(writer);
        self
    }

    pub fn add_node(&mut self, node: v1::Node) -> Result<()> {
        let node = Node::new(node)?;
        if self.nodes.contains_key(node.name()) {
            return Err(SimulatorError::invalid_config(format!(
                "duplicate node {}",
                node.name()
            )));
        }
        self.nodes.insert(node.name().to_string(), node);
        Ok(())
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn nodes(&self) -> &BTreeMap<String, Node> {
        &self.nodes
    }

    pub fn pending_pods(&self) -> usize {
        self.queue.len()
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Run ticks until the workload is done or the token is cancelled
    pub async fn run(&mut self, token: CancellationToken) -> Result<RunSummary> {
        info!(
            "Starting simulation at {} with {} nodes (tick {}s)",
            self.clock,
            self.nodes.len(),
            self.tick.num_seconds()
        );

        loop {
            if token.is_cancelled() {
                info!("Simulation cancelled at {}", self.clock);
                return Err(SimulatorError::cancelled(self.clock.to_rfc3339()));
            }

            if self.step().await? {
                break;
            }
            // Let a pending cancellation signal through between ticks
            tokio::task::yield_now().await;
        }

        info!(
            "Simulation finished at {} after {} ticks: {} bound, {} preempted, {} rejected",
            self.clock,
            self.summary.ticks,
            self.summary.pods_bound,
            self.summary.pods_preempted,
            self.summary.pods_rejected
        );
        Ok(self.summary.clone())
    }

    /// Run a single tick. Returns true once nothing is left to simulate;
    /// the clock is advanced only otherwise.
    pub async fn step(&mut self) -> Result<bool> {
        let clock = self.clock;
        debug!("Tick {} at {}", self.summary.ticks, clock);

        self.run_submitters(clock).await?;

        let mut node_infos = self.node_infos(clock)?;
        let events = self
            .scheduler
            .schedule(clock, self.queue.as_mut(), &mut node_infos)
            .await?;
        self.apply_scheduling_events(clock, events)?;

        self.summary.ticks += 1;
        if self.summary.ticks % self.metrics_tick == 0 {
            self.write_metrics(clock)?;
        }

        for node in self.nodes.values_mut() {
            node.gc_terminated_pods(clock);
        }

        if self.is_finished(clock) {
            return Ok(true);
        }
        self.clock = clock.checked_add(self.tick).ok_or_else(|| {
            SimulatorError::internal_error(format!("Clock overflow after {}", clock))
        })?;
        Ok(false)
    }

    fn is_finished(&self, clock: Clock) -> bool {
        self.submitters.is_empty()
            && self.queue.is_empty()
            && self
                .nodes
                .values()
                .all(|node| node.active_pods(clock).next().is_none())
    }

    async fn run_submitters(&mut self, clock: Clock) -> Result<()> {
        if self.submitters.is_empty() {
            return Ok(());
        }

        let metrics = Metrics::collect(clock, &self.nodes, self.queue.len())?;
        let mut batches = Vec::with_capacity(self.submitters.len());
        for submitter in self.submitters.iter_mut() {
            let events = submitter
                .submit(clock, &self.nodes, &metrics)
                .await
                .map_err(|e| match e {
                    e @ SimulatorError::SubmitterFailed { .. } => e,
                    e => SimulatorError::submitter_failed(submitter.name(), e.to_string()),
                })?;
            batches.push(events);
        }

        let mut terminated = BTreeSet::new();
        for (index, events) in batches.into_iter().enumerate() {
            for event in events {
                match event {
                    SubmitterEvent::Submit(pod) => self.submit_pod(clock, *pod)?,
                    SubmitterEvent::Delete { namespace, name } => {
                        self.delete_pod(clock, &PodKey::new(namespace, name))
                    }
                    SubmitterEvent::Update {
                        namespace,
                        name,
                        pod,
                    } => self.update_pod(&PodKey::new(namespace, name), *pod)?,
                    SubmitterEvent::Terminate => {
                        terminated.insert(index);
                    }
                }
            }
        }

        let mut index = 0;
        self.submitters.retain(|submitter| {
            let done = terminated.contains(&index);
            if done {
                info!("Submitter {} terminated at {}", submitter.name(), clock);
            }
            index += 1;
            !done
        });
        Ok(())
    }

    /// Queue a submitted pod. Pods the simulator cannot model are logged and
    /// dropped.
    fn submit_pod(&mut self, clock: Clock, mut pod: v1::Pod) -> Result<()> {
        if pod.metadata.namespace.is_none() {
            pod.metadata.namespace = Some("default".to_string());
        }
        if let Err(e) = validate(&pod) {
            warn!("Rejected submitted pod: {}", e);
            self.summary.pods_rejected += 1;
            return Ok(());
        }

        let key = PodKey::from_v1(&pod)?;
        if let Some(node) = self.nodes.values().find(|n| n.pod(&key).is_some()) {
            warn!(
                "Rejected submitted pod {}: already bound to node {}",
                key,
                node.name()
            );
            self.summary.pods_rejected += 1;
            return Ok(());
        }

        pod.metadata.creation_timestamp = Some(clock.to_k8s_time());
        if pod.metadata.uid.is_none() {
            pod.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        }

        debug!("Submitted pod {}", key);
        self.queue.push(pod)?;
        self.summary.pods_submitted += 1;
        Ok(())
    }

    fn delete_pod(&mut self, clock: Clock, key: &PodKey) {
        if self.queue.delete(key) {
            info!("Deleted pending pod {}", key);
            return;
        }
        for node in self.nodes.values_mut() {
            if node.delete_pod(clock, key) {
                info!("Deleted pod {} on node {}", key, node.name());
                return;
            }
        }
        warn!("Cannot delete pod {}: not found or already deleted", key);
    }

    fn update_pod(&mut self, key: &PodKey, pod: v1::Pod) -> Result<()> {
        if let Err(e) = validate(&pod) {
            warn!("Rejected update of pod {}: {}", key, e);
            return Ok(());
        }
        match self.queue.update(key, pod) {
            Ok(()) => Ok(()),
            Err(kubesim_scheduler::SchedulerError::NoMatchingPod { .. }) => {
                warn!("Cannot update pod {}: not pending", key);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Scheduler view of every node, holding the pods that currently occupy
    /// resources
    fn node_infos(&self, clock: Clock) -> Result<BTreeMap<String, Arc<NodeInfo>>> {
        self.nodes
            .iter()
            .map(|(name, node)| -> Result<(String, Arc<NodeInfo>)> {
                let info = NodeInfo::with_pods(
                    node.v1().clone(),
                    node.active_pods(clock).map(|pod| pod.to_v1(clock)),
                )?;
                Ok((name.clone(), Arc::new(info)))
            })
            .collect()
    }

    fn apply_scheduling_events(&mut self, clock: Clock, events: Vec<SchedulingEvent>) -> Result<()> {
        for event in events {
            match event {
                SchedulingEvent::Bind { pod, node_name } => {
                    let node = self.nodes.get_mut(&node_name).ok_or_else(|| {
                        SimulatorError::internal_error(format!(
                            "Bind to unknown node {}",
                            node_name
                        ))
                    })?;
                    node.bind_pod(clock, pod)?;
                    self.summary.pods_bound += 1;
                }
                SchedulingEvent::Delete {
                    namespace,
                    name,
                    node_name,
                } => {
                    let key = PodKey::new(namespace, name);
                    let deleted = self
                        .nodes
                        .get_mut(&node_name)
                        .map(|node| node.delete_pod(clock, &key))
                        .unwrap_or(false);
                    if deleted {
                        self.summary.pods_preempted += 1;
                    } else {
                        warn!(
                            "Preemption victim {} on node {} is gone or already deleted",
                            key, node_name
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn write_metrics(&mut self, clock: Clock) -> Result<()> {
        if self.writers.is_empty() {
            return Ok(());
        }
        let metrics = Metrics::collect(clock, &self.nodes, self.queue.len())?;
        for writer in self.writers.iter_mut() {
            writer.write(&metrics)?;
        }
        Ok(())
    }
}
