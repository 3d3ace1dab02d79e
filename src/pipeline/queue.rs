//! Priority request queue
//!
//! Manual > Triggered > Scheduled, FIFO within a class via a monotonic
//! sequence number. `pop_ready` skips requests whose zone is busy.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::{AnalysisRequest, RequestId};

struct QueueEntry {
    request: AnalysisRequest,
    seq: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence first
        self.request
            .priority
            .cmp(&other.request.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
pub struct RequestQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: AnalysisRequest) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueEntry { request, seq });
    }

    /// Highest ranked request whose zone is not busy
    pub fn pop_ready(&mut self, is_busy: impl Fn(&str) -> bool) -> Option<AnalysisRequest> {
        let mut skipped = Vec::new();
        let mut found = None;
        while let Some(entry) = self.heap.pop() {
            if is_busy(&entry.request.zone) {
                skipped.push(entry);
            } else {
                found = Some(entry.request);
                break;
            }
        }
        self.heap.extend(skipped);
        found
    }

    /// Remove and return every request matching `predicate`
    pub fn remove_where(
        &mut self,
        predicate: impl Fn(&AnalysisRequest) -> bool,
    ) -> Vec<AnalysisRequest> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.heap)
            .into_vec()
            .into_iter()
            .partition(|entry| predicate(&entry.request));
        self.heap = kept.into();
        removed.into_iter().map(|entry| entry.request).collect()
    }

    pub fn drain(&mut self) -> Vec<AnalysisRequest> {
        let mut entries = std::mem::take(&mut self.heap).into_sorted_vec();
        entries.reverse();
        entries.into_iter().map(|entry| entry.request).collect()
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.heap.iter().any(|entry| &entry.request.id == id)
    }

    pub fn has_zone(&self, zone: &str) -> bool {
        self.heap.iter().any(|entry| entry.request.zone == zone)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;
    use proptest::prelude::*;

    fn req(zone: &str, priority: Priority) -> AnalysisRequest {
        AnalysisRequest::new(zone, priority)
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = RequestQueue::new();
        let s1 = req("a", Priority::Scheduled);
        let t1 = req("b", Priority::Triggered);
        let m1 = req("c", Priority::Manual);
        let s2 = req("d", Priority::Scheduled);
        let m2 = req("e", Priority::Manual);
        for r in [&s1, &t1, &m1, &s2, &m2] {
            queue.push(r.clone());
        }

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_ready(|_| false))
            .map(|r| r.id)
            .collect();
        assert_eq!(order, vec![m1.id, m2.id, t1.id, s1.id, s2.id]);
    }

    #[test]
    fn test_busy_zone_skipped_but_kept() {
        let mut queue = RequestQueue::new();
        let busy = req("kitchen", Priority::Manual);
        let other = req("garage", Priority::Scheduled);
        queue.push(busy.clone());
        queue.push(other.clone());

        let next = queue.pop_ready(|zone| zone == "kitchen").unwrap();
        assert_eq!(next.id, other.id);
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(&busy.id));
        assert!(queue.pop_ready(|zone| zone == "kitchen").is_none());
    }

    #[test]
    fn test_remove_where_and_drain() {
        let mut queue = RequestQueue::new();
        queue.push(req("a", Priority::Scheduled));
        queue.push(req("b", Priority::Manual));
        queue.push(req("a", Priority::Triggered));

        let removed = queue.remove_where(|r| r.zone == "a");
        assert_eq!(removed.len(), 2);
        assert!(!queue.has_zone("a"));

        queue.push(req("c", Priority::Scheduled));
        let drained = queue.drain();
        assert_eq!(drained[0].zone, "b");
        assert_eq!(drained[1].zone, "c");
        assert!(queue.is_empty());
    }

    fn priority() -> impl Strategy<Value = Priority> {
        prop_oneof![
            Just(Priority::Scheduled),
            Just(Priority::Triggered),
            Just(Priority::Manual),
        ]
    }

    proptest! {
        #[test]
        fn test_dequeue_order_is_priority_then_insertion(priorities in prop::collection::vec(priority(), 0..50)) {
            let mut queue = RequestQueue::new();
            for (i, p) in priorities.iter().enumerate() {
                queue.push(req(&i.to_string(), *p));
            }

            let mut expected: Vec<(usize, Priority)> = priorities.iter().copied().enumerate().collect();
            expected.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

            for (index, _) in expected {
                let next = queue.pop_ready(|_| false).unwrap();
                prop_assert_eq!(next.zone, index.to_string());
            }
            prop_assert!(queue.is_empty());
        }
    }
}
