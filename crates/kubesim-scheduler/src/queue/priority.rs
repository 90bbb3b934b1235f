use super::{default_comparator, queue_key, PodComparator, PodQueue};
use crate::error::{Result, SchedulerError};
use k8s_openapi::api::core::v1;
use kubesim_core::PodKey;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

struct Item {
    key: PodKey,
    pod: Arc<v1::Pod>,
}

/// Pending pods ordered by a comparator, highest priority at the front.
///
/// A binary heap stored in a vector plus a key to slot index; every indexed
/// key has exactly one heap slot and every slot is indexed.
pub struct PriorityQueue {
    comparator: PodComparator,
    heap: Vec<Item>,
    index: HashMap<PodKey, usize>,
    /// Node name to the pods nominated onto it
    nominated_pods: BTreeMap<String, Vec<(PodKey, Arc<v1::Pod>)>>,
    /// Pod key to the node it is nominated onto
    nominated_node: HashMap<PodKey, String>,
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityQueue {
    /// Create a queue with the default ordering
    pub fn new() -> Self {
        Self::with_comparator(default_comparator())
    }

    pub fn with_comparator(comparator: PodComparator) -> Self {
        Self {
            comparator,
            heap: Vec::new(),
            index: HashMap::new(),
            nominated_pods: BTreeMap::new(),
            nominated_node: HashMap::new(),
        }
    }

    /// A new queue with the same pods and nominations, ordered by
    /// `comparator`. This queue is left untouched.
    pub fn reorder(&self, comparator: PodComparator) -> PriorityQueue {
        let mut queue = PriorityQueue::with_comparator(comparator);
        for item in &self.heap {
            queue.insert(item.key.clone(), item.pod.clone());
        }
        queue.nominated_pods = self.nominated_pods.clone();
        queue.nominated_node = self.nominated_node.clone();
        queue
    }

    fn less(&self, i: usize, j: usize) -> bool {
        (self.comparator)(&self.heap[i].pod, &self.heap[j].pod)
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.index.insert(self.heap[i].key.clone(), i);
        self.index.insert(self.heap[j].key.clone(), j);
    }

    fn sift_up(&mut self, mut i: usize) -> bool {
        let start = i;
        while i > 0 {
            let parent = (i - 1) / 2;
            if !self.less(i, parent) {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
        i != start
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * i + 1;
            if left >= len {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < len && self.less(right, left) {
                child = right;
            }
            if !self.less(child, i) {
                break;
            }
            self.swap(i, child);
            i = child;
        }
    }

    /// Restore heap order after the item at `i` changed
    fn fix(&mut self, i: usize) {
        if !self.sift_up(i) {
            self.sift_down(i);
        }
    }

    /// Insert or replace in place, without touching nominations
    fn insert(&mut self, key: PodKey, pod: Arc<v1::Pod>) {
        match self.index.get(&key) {
            Some(&i) => {
                self.heap[i].pod = pod;
                self.fix(i);
            }
            None => {
                let i = self.heap.len();
                self.index.insert(key.clone(), i);
                self.heap.push(Item { key, pod });
                self.sift_up(i);
            }
        }
    }

    fn remove_at(&mut self, i: usize) -> Item {
        let last = self.heap.len() - 1;
        if i != last {
            self.swap(i, last);
        }
        let item = self.heap.remove(last);
        self.index.remove(&item.key);
        if i < self.heap.len() {
            self.fix(i);
        }
        item
    }

    /// Make an incoming pod agree with the nomination table: a recorded
    /// nomination is mirrored into its status, otherwise a nomination the
    /// pod carries is recorded.
    fn store(&mut self, key: PodKey, mut pod: v1::Pod) {
        match self.nominated_node.get(&key) {
            Some(node) => set_nominated_node_name(&mut pod, Some(node.as_str())),
            None => {
                if let Some(node) = nominated_node_name(&pod) {
                    self.nominated_node.insert(key.clone(), node);
                }
            }
        }

        let pod = Arc::new(pod);
        self.insert(key.clone(), pod.clone());

        if let Some(node) = self.nominated_node.get(&key) {
            let pods = self.nominated_pods.entry(node.clone()).or_default();
            match pods.iter().position(|(k, _)| k == &key) {
                Some(i) => pods[i].1 = pod,
                None => pods.push((key, pod)),
            }
        }
    }

    fn clear_nomination(&mut self, key: &PodKey) {
        if let Some(node) = self.nominated_node.remove(key) {
            if let Some(pods) = self.nominated_pods.get_mut(&node) {
                pods.retain(|(k, _)| k != key);
                if pods.is_empty() {
                    self.nominated_pods.remove(&node);
                }
            }
        }
    }
}

fn nominated_node_name(pod: &v1::Pod) -> Option<String> {
    pod.status
        .as_ref()
        .and_then(|s| s.nominated_node_name.clone())
        .filter(|n| !n.is_empty())
}

fn set_nominated_node_name(pod: &mut v1::Pod, node: Option<&str>) {
    pod.status.get_or_insert_with(Default::default).nominated_node_name = node.map(str::to_string);
}

impl PodQueue for PriorityQueue {
    fn push(&mut self, pod: v1::Pod) -> Result<()> {
        let key = queue_key(&pod)?;
        self.store(key, pod);
        Ok(())
    }

    fn pop(&mut self) -> Result<Arc<v1::Pod>> {
        if self.heap.is_empty() {
            return Err(SchedulerError::EmptyQueue);
        }
        Ok(self.remove_at(0).pod)
    }

    fn front(&self) -> Result<Arc<v1::Pod>> {
        self.heap
            .first()
            .map(|item| item.pod.clone())
            .ok_or(SchedulerError::EmptyQueue)
    }

    fn delete(&mut self, key: &PodKey) -> bool {
        self.clear_nomination(key);
        match self.index.get(key) {
            Some(&i) => {
                self.remove_at(i);
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
        if !self.index.contains_key(key) {
            return Err(SchedulerError::no_matching_pod(key.to_string()));
        }
        self.store(new_key, pod);
        Ok(())
    }

    fn update_nominated_node(&mut self, pod: &v1::Pod, node_name: &str) -> Result<()> {
        let key = queue_key(pod)?;
        self.clear_nomination(&key);

        let stored = match self.index.get(&key) {
            Some(&i) => {
                set_nominated_node_name(Arc::make_mut(&mut self.heap[i].pod), Some(node_name));
                self.fix(i);
                // fix() may have moved the item
                let i = self.index[&key];
                self.heap[i].pod.clone()
            }
            None => {
                let mut pod = pod.clone();
                set_nominated_node_name(&mut pod, Some(node_name));
                Arc::new(pod)
            }
        };

        debug!("Nominated pod {} onto node {}", key, node_name);
        self.nominated_node.insert(key.clone(), node_name.to_string());
        self.nominated_pods
            .entry(node_name.to_string())
            .or_default()
            .push((key, stored));
        Ok(())
    }

    fn remove_nominated_node(&mut self, pod: &v1::Pod) -> Result<()> {
        let key = queue_key(pod)?;
        self.clear_nomination(&key);

        if let Some(&i) = self.index.get(&key) {
            set_nominated_node_name(Arc::make_mut(&mut self.heap[i].pod), None);
            self.fix(i);
        }
        Ok(())
    }

    fn nominated_pods(&self, node_name: &str) -> Vec<Arc<v1::Pod>> {
        self.nominated_pods
            .get(node_name)
            .map(|pods| pods.iter().map(|(_, pod)| pod.clone()).collect())
            .unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_pod;
    use kubesim_core::pod_priority;

    fn assert_consistent(queue: &PriorityQueue) {
        assert_eq!(queue.heap.len(), queue.index.len());
        for (i, item) in queue.heap.iter().enumerate() {
            assert_eq!(queue.index[&item.key], i);
            if i > 0 {
                let parent = (i - 1) / 2;
                assert!(!(queue.comparator)(&item.pod, &queue.heap[parent].pod));
            }
        }
    }

    fn name(pod: &v1::Pod) -> &str {
        pod.metadata.name.as_deref().unwrap()
    }

    fn drain(queue: &mut PriorityQueue) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok(pod) = queue.pop() {
            assert_consistent(queue);
            names.push(name(&pod).to_string());
        }
        names
    }

    #[test]
    fn test_pop_in_priority_order() {
        let mut queue = PriorityQueue::new();
        for (pod, priority) in [("a", 1), ("b", 5), ("c", 3), ("d", 5), ("e", -2)] {
            queue.push(create_test_pod(pod, "1", priority)).unwrap();
            assert_consistent(&queue);
        }

        assert_eq!(queue.len(), 5);
        assert_eq!(pod_priority(&queue.front().unwrap()), 5);

        let order = drain(&mut queue);
        assert_eq!(&order[2..], &["c", "a", "e"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_empty_queue() {
        let mut queue = PriorityQueue::new();
        assert!(matches!(queue.pop(), Err(SchedulerError::EmptyQueue)));
        assert!(matches!(queue.front(), Err(SchedulerError::EmptyQueue)));
    }

    #[test]
    fn test_push_requires_key() {
        let mut queue = PriorityQueue::new();
        let mut pod = create_test_pod("a", "1", 0);
        pod.metadata.namespace = None;

        assert!(matches!(
            queue.push(pod),
            Err(SchedulerError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_push_same_key_replaces() {
        let mut queue = PriorityQueue::new();
        queue.push(create_test_pod("a", "1", 1)).unwrap();
        queue.push(create_test_pod("b", "1", 2)).unwrap();
        queue.push(create_test_pod("a", "1", 10)).unwrap();

        assert_eq!(queue.len(), 2);
        assert_consistent(&queue);
        assert_eq!(name(&queue.front().unwrap()), "a");
    }

    #[test]
    fn test_update() {
        let mut queue = PriorityQueue::new();
        queue.push(create_test_pod("a", "1", 1)).unwrap();
        queue.push(create_test_pod("b", "1", 2)).unwrap();

        let key = PodKey::new("default", "a");
        queue.update(&key, create_test_pod("a", "1", 3)).unwrap();
        assert_consistent(&queue);
        assert_eq!(name(&queue.front().unwrap()), "a");

        assert!(matches!(
            queue.update(&key, create_test_pod("b", "1", 3)),
            Err(SchedulerError::DifferentIdentity { .. })
        ));

        let missing = PodKey::new("default", "zzz");
        assert!(matches!(
            queue.update(&missing, create_test_pod("zzz", "1", 0)),
            Err(SchedulerError::NoMatchingPod { .. })
        ));
    }

    #[test]
    fn test_delete() {
        let mut queue = PriorityQueue::new();
        for (pod, priority) in [("a", 1), ("b", 2), ("c", 3)] {
            queue.push(create_test_pod(pod, "1", priority)).unwrap();
        }

        assert!(queue.delete(&PodKey::new("default", "c")));
        assert!(!queue.delete(&PodKey::new("default", "c")));
        assert_consistent(&queue);
        assert_eq!(drain(&mut queue), vec!["b", "a"]);
    }

    #[test]
    fn test_heap_index_invariant_under_churn() {
        let mut queue = PriorityQueue::new();
        // Deterministic pseudo-random sequence of pushes, updates and deletes
        let mut seed: u64 = 42;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as i32
        };

        for _ in 0..300 {
            let name = format!("pod-{}", next().rem_euclid(40));
            match next().rem_euclid(3) {
                0 | 1 => queue
                    .push(create_test_pod(&name, "1", next().rem_euclid(20)))
                    .unwrap(),
                _ => {
                    queue.delete(&PodKey::new("default", name));
                }
            }
            assert_consistent(&queue);
        }

        let mut last = i32::MAX;
        while let Ok(pod) = queue.pop() {
            assert!(pod_priority(&pod) <= last);
            last = pod_priority(&pod);
        }
    }

    #[test]
    fn test_nomination_round_trip() {
        let mut queue = PriorityQueue::new();
        let pod = create_test_pod("a", "1", 5);
        queue.push(pod.clone()).unwrap();

        queue.update_nominated_node(&pod, "node1").unwrap();
        let nominated = queue.nominated_pods("node1");
        assert_eq!(nominated.len(), 1);
        assert_eq!(
            nominated[0].status.as_ref().unwrap().nominated_node_name.as_deref(),
            Some("node1")
        );
        let queued = queue.front().unwrap();
        assert_eq!(
            queued.status.as_ref().unwrap().nominated_node_name.as_deref(),
            Some("node1")
        );

        // A new nomination replaces the old one
        queue.update_nominated_node(&pod, "node2").unwrap();
        assert!(queue.nominated_pods("node1").is_empty());
        assert_eq!(queue.nominated_pods("node2").len(), 1);

        queue.remove_nominated_node(&pod).unwrap();
        assert!(queue.nominated_pods("node2").is_empty());
        let queued = queue.front().unwrap();
        assert!(queued.status.as_ref().unwrap().nominated_node_name.is_none());
    }

    #[test]
    fn test_nomination_survives_update_and_clears_on_delete() {
        let mut queue = PriorityQueue::new();
        let pod = create_test_pod("a", "1", 5);
        queue.push(pod.clone()).unwrap();
        queue.update_nominated_node(&pod, "node1").unwrap();

        let key = PodKey::new("default", "a");
        queue.update(&key, create_test_pod("a", "1", 7)).unwrap();
        let nominated = queue.nominated_pods("node1");
        assert_eq!(pod_priority(&nominated[0]), 7);
        assert_eq!(
            queue.front().unwrap().status.as_ref().unwrap().nominated_node_name.as_deref(),
            Some("node1")
        );

        // Popping keeps the nomination until the scheduler clears it
        queue.pop().unwrap();
        assert_eq!(queue.nominated_pods("node1").len(), 1);

        queue.push(create_test_pod("a", "1", 7)).unwrap();
        assert!(queue.delete(&key));
        assert!(queue.nominated_pods("node1").is_empty());
    }

    #[test]
    fn test_reorder() {
        let mut queue = PriorityQueue::new();
        for (pod, priority) in [("a", 1), ("b", 3), ("c", 2)] {
            queue.push(create_test_pod(pod, "1", priority)).unwrap();
        }
        let pod = create_test_pod("b", "1", 3);
        queue.update_nominated_node(&pod, "node1").unwrap();

        let lowest_first: PodComparator =
            Arc::new(|a: &v1::Pod, b: &v1::Pod| pod_priority(a) < pod_priority(b));
        let mut reordered = queue.reorder(lowest_first);
        assert_consistent(&reordered);
        assert_eq!(reordered.nominated_pods("node1").len(), 1);
        assert_eq!(drain(&mut reordered), vec!["a", "c", "b"]);

        // The live queue keeps its own order
        assert_eq!(drain(&mut queue), vec!["b", "c", "a"]);
    }
}
