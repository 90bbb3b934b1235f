use crate::config::{WorkloadAction, WorkloadEntry};
use crate::error::{Result, SimulatorError};
use crate::metrics::Metrics;
use crate::submitter::{NodeLister, Submitter, SubmitterEvent};
use async_trait::async_trait;
use chrono::Duration;
use kubesim_core::Clock;
use std::collections::VecDeque;
use tracing::debug;

/// Replays a fixed list of workload entries at their offsets from the
/// start clock, then terminates
pub struct ScriptedSubmitter {
    start: Clock,
    pending: VecDeque<WorkloadEntry>,
}

impl ScriptedSubmitter {
    pub fn new(start: Clock, mut entries: Vec<WorkloadEntry>) -> Self {
        // Stable, so entries with the same offset keep their file order
        entries.sort_by_key(|e| e.at);
        Self {
            start,
            pending: entries.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl Submitter for ScriptedSubmitter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit(
        &mut self,
        clock: Clock,
        _nodes: &dyn NodeLister,
        _metrics: &Metrics,
    ) -> Result<Vec<SubmitterEvent>> {
        let mut events = Vec::new();

        while let Some(entry) = self.pending.front() {
            let due = Duration::try_seconds(entry.at)
                .and_then(|offset| self.start.checked_add(offset))
                .ok_or_else(|| {
                    SimulatorError::invalid_config(format!(
                        "workload: offset {} is out of range",
                        entry.at
                    ))
                })?;
            if due > clock {
                break;
            }
            let Some(entry) = self.pending.pop_front() else {
                break;
            };
            events.push(match entry.action {
                WorkloadAction::Pod(pod) => SubmitterEvent::Submit(pod),
                WorkloadAction::Delete(pod) => SubmitterEvent::Delete {
                    namespace: pod.namespace,
                    name: pod.name,
                },
            });
        }

        if self.pending.is_empty() {
            events.push(SubmitterEvent::Terminate);
        }

        debug!("Scripted submitter emitted {} events at {}", events.len(), clock);
        Ok(events)
    }
}
