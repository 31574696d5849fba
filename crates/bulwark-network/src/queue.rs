//! The bounded priority queue of deferred operations.
//!
//! Operations drain critical first, then high, medium and low; FIFO within a
//! priority. When the queue is full the entry that would drain last is
//! evicted, which may be the one just inserted.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority of a queued operation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OperationPriority {
    /// Drained last.
    Low,
    /// Default priority.
    #[default]
    Medium,
    /// Drained before medium.
    High,
    /// Drained first.
    Critical,
}

impl OperationPriority {
    /// Returns the priority as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for OperationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An operation deferred until connectivity returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique identifier.
    pub id: String,
    /// Drain priority.
    pub priority: OperationPriority,
    /// What kind of operation this is, interpreted by the executor.
    pub kind: String,
    /// Opaque payload for the executor.
    pub payload: serde_json::Value,
    /// Failed replays so far.
    pub retry_count: u32,
    /// Failed replays tolerated before the operation is dropped.
    pub max_retries: u32,
    /// Operations that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// When the operation was first queued.
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedOperation {
    /// Default number of failed replays tolerated.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Creates a medium-priority operation.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            priority: OperationPriority::Medium,
            kind: kind.into(),
            payload,
            retry_count: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            dependencies: Vec::new(),
            enqueued_at: Utc::now(),
        }
    }

    /// Sets the ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: OperationPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the maximum number of failed replays.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Adds a dependency on another queued operation.
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Whether the failures so far exceed the replay budget. The first
    /// attempt does not count against `max_retries`.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.retry_count > self.max_retries
    }
}

type QueueKey = (Reverse<OperationPriority>, u64);

/// Bounded priority queue.
#[derive(Debug, Clone)]
pub struct OperationQueue {
    capacity: usize,
    next_seq: u64,
    entries: BTreeMap<QueueKey, QueuedOperation>,
}

impl OperationQueue {
    /// Default capacity.
    pub const DEFAULT_CAPACITY: usize = 100;

    /// Creates an empty queue. A zero capacity is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_seq: 0,
            entries: BTreeMap::new(),
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts an operation, returning the entry evicted to make room.
    ///
    /// An entry with the same ID is replaced.
    pub fn push(&mut self, operation: QueuedOperation) -> Option<QueuedOperation> {
        self.remove(&operation.id);
        let key = (Reverse(operation.priority), self.next_seq);
        self.next_seq += 1;
        self.entries.insert(key, operation);

        if self.entries.len() > self.capacity {
            self.entries.pop_last().map(|(_, evicted)| evicted)
        } else {
            None
        }
    }

    /// Removes and returns the first operation in drain order that is not in
    /// `skip` and whose dependencies are neither queued nor in `skip`.
    pub fn pop_ready(&mut self, skip: &HashSet<String>) -> Option<QueuedOperation> {
        let queued: HashSet<&str> = self.entries.values().map(|op| op.id.as_str()).collect();

        let key = self
            .entries
            .iter()
            .find(|(_, op)| {
                !skip.contains(&op.id)
                    && op
                        .dependencies
                        .iter()
                        .all(|dep| !queued.contains(dep.as_str()) && !skip.contains(dep))
            })
            .map(|(key, _)| *key)?;

        self.entries.remove(&key)
    }

    /// Removes an operation by ID.
    pub fn remove(&mut self, id: &str) -> Option<QueuedOperation> {
        let key = self
            .entries
            .iter()
            .find(|(_, op)| op.id == id)
            .map(|(key, _)| *key)?;
        self.entries.remove(&key)
    }

    /// Returns true if an operation with the ID is queued.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.values().any(|op| op.id == id)
    }

    /// Returns the operations in drain order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueuedOperation> {
        self.entries.values().cloned().collect()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(id: &str, priority: OperationPriority) -> QueuedOperation {
        QueuedOperation::new("sync", json!({})).with_id(id).with_priority(priority)
    }

    fn drain(queue: &mut OperationQueue) -> Vec<String> {
        let mut order = Vec::new();
        while let Some(op) = queue.pop_ready(&HashSet::new()) {
            order.push(op.id);
        }
        order
    }

    mod ordering_tests {
        use super::*;

        #[test]
        fn priority_order() {
            let mut queue = OperationQueue::default();
            queue.push(op("low", OperationPriority::Low));
            queue.push(op("high", OperationPriority::High));
            queue.push(op("medium", OperationPriority::Medium));

            assert_eq!(drain(&mut queue), vec!["high", "medium", "low"]);
        }

        #[test]
        fn fifo_within_priority() {
            let mut queue = OperationQueue::default();
            queue.push(op("a", OperationPriority::High));
            queue.push(op("b", OperationPriority::High));
            queue.push(op("c", OperationPriority::Critical));
            queue.push(op("d", OperationPriority::High));

            assert_eq!(drain(&mut queue), vec!["c", "a", "b", "d"]);
        }

        #[test]
        fn priority_ordering_of_enum() {
            assert!(OperationPriority::Critical > OperationPriority::High);
            assert!(OperationPriority::High > OperationPriority::Medium);
            assert!(OperationPriority::Medium > OperationPriority::Low);
        }
    }

    mod capacity_tests {
        use super::*;

        #[test]
        fn evicts_lowest_priority_when_full() {
            let mut queue = OperationQueue::new(2);
            assert!(queue.push(op("low", OperationPriority::Low)).is_none());
            assert!(queue.push(op("high", OperationPriority::High)).is_none());

            let evicted = queue.push(op("critical", OperationPriority::Critical));
            assert_eq!(evicted.map(|o| o.id), Some("low".to_string()));
            assert_eq!(queue.len(), 2);
        }

        #[test]
        fn rejects_incoming_when_it_is_lowest() {
            let mut queue = OperationQueue::new(1);
            queue.push(op("high", OperationPriority::High));

            let evicted = queue.push(op("low", OperationPriority::Low));
            assert_eq!(evicted.map(|o| o.id), Some("low".to_string()));
            assert!(queue.contains("high"));
        }

        #[test]
        fn evicts_newest_of_lowest_priority() {
            let mut queue = OperationQueue::new(2);
            queue.push(op("old", OperationPriority::Low));
            queue.push(op("new", OperationPriority::Low));

            let evicted = queue.push(op("medium", OperationPriority::Medium));
            assert_eq!(evicted.map(|o| o.id), Some("new".to_string()));
        }

        #[test]
        fn zero_capacity_is_one() {
            assert_eq!(OperationQueue::new(0).capacity(), 1);
        }
    }

    mod dependency_tests {
        use super::*;

        #[test]
        fn dependent_waits_for_queued_dependency() {
            let mut queue = OperationQueue::default();
            queue.push(op("base", OperationPriority::Low));
            queue.push(op("child", OperationPriority::Critical).depends_on("base"));

            assert_eq!(drain(&mut queue), vec!["base", "child"]);
        }

        #[test]
        fn blocked_dependency_holds_operation() {
            let mut queue = OperationQueue::default();
            queue.push(op("child", OperationPriority::High).depends_on("failed"));

            let blocked: HashSet<String> = ["failed".to_string()].into_iter().collect();
            assert!(queue.pop_ready(&blocked).is_none());
            assert_eq!(queue.len(), 1);
        }

        #[test]
        fn skipped_operation_is_not_popped() {
            let mut queue = OperationQueue::default();
            queue.push(op("retry", OperationPriority::Critical));
            queue.push(op("other", OperationPriority::Low));

            let skip: HashSet<String> = ["retry".to_string()].into_iter().collect();
            assert_eq!(queue.pop_ready(&skip).map(|o| o.id), Some("other".to_string()));
            assert!(queue.pop_ready(&skip).is_none());
        }
    }

    #[test]
    fn remove_by_id() {
        let mut queue = OperationQueue::default();
        queue.push(op("a", OperationPriority::Low));
        assert!(queue.remove("a").is_some());
        assert!(queue.remove("a").is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn duplicate_id_replaces_entry() {
        let mut queue = OperationQueue::default();
        queue.push(op("a", OperationPriority::Low));
        assert!(queue.push(op("a", OperationPriority::High)).is_none());

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.snapshot()[0].priority, OperationPriority::High);
        assert!(queue.remove("a").is_some());
        assert!(!queue.contains("a"));
    }

    #[test]
    fn exhaustion() {
        let mut operation = op("a", OperationPriority::Low).with_max_retries(1);
        operation.retry_count = 1;
        assert!(!operation.is_exhausted());
        operation.retry_count = 2;
        assert!(operation.is_exhausted());
    }

    #[test]
    fn zero_retries_exhausted_after_first_failure() {
        let mut operation = op("a", OperationPriority::Low).with_max_retries(0);
        assert!(!operation.is_exhausted());
        operation.retry_count = 1;
        assert!(operation.is_exhausted());
    }
}
