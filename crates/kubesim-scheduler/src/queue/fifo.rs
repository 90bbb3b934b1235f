use super::{queue_key, PodQueue};
use crate::error::{Result, SchedulerError};
use k8s_openapi::api::core::v1;
use kubesim_core::PodKey;
use std::collections::VecDeque;
use std::sync::Arc;

/// Pending pods in arrival order. Nominations are not tracked.
#[derive(Default)]
pub struct FifoQueue {
    pods: VecDeque<(PodKey, Arc<v1::Pod>)>,
}

impl FifoQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &PodKey) -> Option<usize> {
        self.pods.iter().position(|(k, _)| k == key)
    }
}

impl PodQueue for FifoQueue {
    fn push(&mut self, pod: v1::Pod) -> Result<()> {
        let key = queue_key(&pod)?;
        match self.position(&key) {
            Some(i) => self.pods[i].1 = Arc::new(pod),
            None => self.pods.push_back((key, Arc::new(pod))),
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<Arc<v1::Pod>> {
        self.pods
            .pop_front()
            .map(|(_, pod)| pod)
            .ok_or(SchedulerError::EmptyQueue)
    }

    fn front(&self) -> Result<Arc<v1::Pod>> {
        self.pods
            .front()
            .map(|(_, pod)| pod.clone())
            .ok_or(SchedulerError::EmptyQueue)
    }

    fn delete(&mut self, key: &PodKey) -> bool {
        match self.position(key) {
            Some(i) => {
                self.pods.remove(i);
                true
            }
            None => false,
        }
    }

    fn update(&mut self, key: &PodKey, pod: v1::Pod) -> Result<()> {
        let new_key = queue_key(&pod)?;
        if &new_key != key {
            return Err(SchedulerError::different_identity(
                key.to_string(),
                new_key.to_string(),
            ));
        }
        let i = self
            .position(key)
            .ok_or_else(|| SchedulerError::no_matching_pod(key.to_string()))?;
        self.pods[i].1 = Arc::new(pod);
        Ok(())
    }

    fn update_nominated_node(&mut self, _pod: &v1::Pod, _node_name: &str) -> Result<()> {
        Ok(())
    }

    fn remove_nominated_node(&mut self, _pod: &v1::Pod) -> Result<()> {
        Ok(())
    }

    fn nominated_pods(&self, _node_name: &str) -> Vec<Arc<v1::Pod>> {
        Vec::new()
    }

    fn supports_nomination(&self) -> bool {
        false
    }

    fn len(&self) -> usize {
        self.pods.len()
    }
}
