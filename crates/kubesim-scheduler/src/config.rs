use crate::filter::{
    CheckNodeReady, CheckNodeUnschedulable, FilterPredicate, MatchNodeSelector, PodFitsResources,
    PodToleratesNodeTaints,
};
use crate::parallel::DEFAULT_PARALLELISM;
use crate::queue::{FifoQueue, PodQueue, PriorityQueue};
use crate::scheduler::GenericScheduler;
use crate::score::{BalancedAllocation, LeastRequested, MostRequested, ScoreFunction, TaintToleration};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Built-in filter predicates, selectable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredicateName {
    PodFitsResources,
    MatchNodeSelector,
    PodToleratesNodeTaints,
    CheckNodeUnschedulable,
    CheckNodeReady,
}

impl PredicateName {
    pub fn build(self) -> Arc<dyn FilterPredicate> {
        match self {
            PredicateName::PodFitsResources => Arc::new(PodFitsResources),
            PredicateName::MatchNodeSelector => Arc::new(MatchNodeSelector),
            PredicateName::PodToleratesNodeTaints => Arc::new(PodToleratesNodeTaints),
            PredicateName::CheckNodeUnschedulable => Arc::new(CheckNodeUnschedulable),
            PredicateName::CheckNodeReady => Arc::new(CheckNodeReady),
        }
    }
}

/// Built-in score functions, selectable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorityName {
    LeastRequested,
    MostRequested,
    BalancedAllocation,
    TaintToleration,
}

impl PriorityName {
    pub fn build(self) -> Arc<dyn ScoreFunction> {
        match self {
            PriorityName::LeastRequested => Arc::new(LeastRequested),
            PriorityName::MostRequested => Arc::new(MostRequested),
            PriorityName::BalancedAllocation => Arc::new(BalancedAllocation),
            PriorityName::TaintToleration => Arc::new(TaintToleration),
        }
    }
}

fn default_weight() -> i64 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityConfig {
    pub name: PriorityName,
    #[serde(default = "default_weight")]
    pub weight: i64,
}

/// Which pending-pod queue to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    #[default]
    Priority,
    Fifo,
}

/// How to break ties between nodes with the highest score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HostSelection {
    /// Rotate through the tied nodes across selections
    #[default]
    RoundRobin,
    /// Always take the last tied node in name order
    LastMax,
}

/// Configuration for the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    pub queue: QueueKind,
    pub preemption: bool,
    pub host_selection: HostSelection,
    /// Concurrent workers for filtering, scoring and victim selection
    pub parallelism: usize,
    pub predicates: Vec<PredicateName>,
    pub priorities: Vec<PriorityConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue: QueueKind::Priority,
            preemption: false,
            host_selection: HostSelection::RoundRobin,
            parallelism: DEFAULT_PARALLELISM,
            predicates: vec![
                PredicateName::PodFitsResources,
                PredicateName::MatchNodeSelector,
                PredicateName::PodToleratesNodeTaints,
                PredicateName::CheckNodeUnschedulable,
                PredicateName::CheckNodeReady,
            ],
            priorities: vec![
                PriorityConfig {
                    name: PriorityName::LeastRequested,
                    weight: 1,
                },
                PriorityConfig {
                    name: PriorityName::BalancedAllocation,
                    weight: 1,
                },
            ],
        }
    }
}

impl SchedulerConfig {
    pub fn build_queue(&self) -> Box<dyn PodQueue> {
        match self.queue {
            QueueKind::Priority => Box::new(PriorityQueue::new()),
            QueueKind::Fifo => Box::new(FifoQueue::new()),
        }
    }

    pub fn build_scheduler(&self) -> GenericScheduler {
        let mut scheduler = GenericScheduler::new()
            .with_preemption(self.preemption)
            .with_host_selection(self.host_selection)
            .with_parallelism(self.parallelism);
        for predicate in &self.predicates {
            scheduler = scheduler.with_predicate(predicate.build());
        }
        for priority in &self.priorities {
            scheduler = scheduler.with_priority(priority.name.build(), priority.weight);
        }
        scheduler
    }
}
